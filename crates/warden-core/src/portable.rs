//! Portable agent documents for sharing agents between installations.
//!
//! Exports drop identity fields (agent id, timestamps). Imports assign new
//! ones and rename code blocks so an imported agent never collides with the
//! agent it was exported from.

use crate::agent::{AgentDefinition, CodeBlock};
use crate::error::WardenError;
use crate::graph::{Graph, StepKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use warden_policy::PermissionModel;
use warden_provider::ProviderConfig;

/// Format tag written into every exported document.
pub const EXPORT_FORMAT: &str = "warden-agent/v1";

/// An exported agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortableAgent {
    pub format: String,
    pub exported_at: u64,
    pub agent: PortableDefinition,
}

/// Agent content without identity fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortableDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub graph: Graph,
    #[serde(default)]
    pub code_blocks: Vec<CodeBlock>,
    #[serde(default)]
    pub permissions: PermissionModel,
    #[serde(default = "default_audit")]
    pub audit_enabled: bool,
}

fn default_audit() -> bool {
    true
}

/// Export an agent to its portable form.
pub fn export_agent(agent: &AgentDefinition) -> PortableAgent {
    PortableAgent {
        format: EXPORT_FORMAT.to_string(),
        exported_at: crate::now_ms(),
        agent: PortableDefinition {
            name: agent.name.clone(),
            description: agent.description.clone(),
            provider: agent.provider.clone(),
            graph: agent.graph.clone(),
            code_blocks: agent.code_blocks.clone(),
            permissions: agent.permissions.clone(),
            audit_enabled: agent.audit_enabled,
        },
    }
}

/// Serialize an export as pretty JSON.
pub fn export_json(agent: &AgentDefinition) -> Result<String, WardenError> {
    Ok(serde_json::to_string_pretty(&export_agent(agent))?)
}

/// Build a new agent from a portable document. The result is validated.
pub fn import_agent(document: PortableAgent) -> Result<AgentDefinition, WardenError> {
    if document.format != EXPORT_FORMAT {
        return Err(WardenError::Validation(format!(
            "unsupported agent format '{}' (expected {EXPORT_FORMAT})",
            document.format
        )));
    }
    let portable = document.agent;

    let renamed: HashMap<String, String> = portable
        .code_blocks
        .iter()
        .map(|b| (b.id.clone(), ulid::Ulid::new().to_string()))
        .collect();
    let code_blocks = portable
        .code_blocks
        .into_iter()
        .map(|mut block| {
            if let Some(id) = renamed.get(&block.id) {
                block.id = id.clone();
            }
            block
        })
        .collect();
    let mut graph = portable.graph;
    for step in &mut graph.steps {
        if let StepKind::CodeBlock { block, .. } = &mut step.kind {
            if let Some(id) = renamed.get(block.as_str()) {
                *block = id.clone();
            }
        }
    }

    let mut agent = AgentDefinition::new(portable.name);
    agent.description = portable.description;
    agent.provider = portable.provider;
    agent.graph = graph;
    agent.code_blocks = code_blocks;
    agent.permissions = portable.permissions;
    agent.audit_enabled = portable.audit_enabled;
    agent.validate()?;
    Ok(agent)
}

/// Parse and import a JSON export.
pub fn import_json(json: &str) -> Result<AgentDefinition, WardenError> {
    let document: PortableAgent = serde_json::from_str(json)
        .map_err(|e| WardenError::Validation(format!("not a valid agent export: {e}")))?;
    import_agent(document)
}
