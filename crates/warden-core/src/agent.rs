//! Agent definitions.

use crate::error::WardenError;
use crate::graph::Graph;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use warden_policy::{PermissionModel, PolicyError};
use warden_provider::ProviderConfig;
use warden_sandbox::AVAILABLE_MODULES;

/// Agent-authored code referenced by code-block steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeBlock {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Script source. Must define `fn run(input, ctx)`.
    pub code: String,
}

fn default_true() -> bool {
    true
}

/// A complete agent: provider selection, step graph, code and permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: String,
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
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    /// Unix milliseconds.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

/// Listing view of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: usize,
    pub updated_at: u64,
}

impl AgentDefinition {
    /// New agent with a fresh id, no steps and no permissions.
    pub fn new(name: impl Into<String>) -> Self {
        let now = crate::now_ms();
        Self {
            id: ulid::Ulid::new().to_string(),
            name: name.into(),
            description: String::new(),
            provider: ProviderConfig::default(),
            graph: Graph::default(),
            code_blocks: Vec::new(),
            permissions: PermissionModel::deny_all(),
            audit_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn code_block(&self, id: &str) -> Option<&CodeBlock> {
        self.code_blocks.iter().find(|b| b.id == id)
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            steps: self.graph.steps.len(),
            updated_at: self.updated_at,
        }
    }

    /// Mark the definition as modified now.
    pub fn touch(&mut self) {
        self.updated_at = crate::now_ms();
    }

    /// Every problem that would stop this agent from running.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.id.trim().is_empty() {
            problems.push("id: must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            problems.push("name: must not be empty".to_string());
        }
        if self.provider.provider.trim().is_empty() || self.provider.model.trim().is_empty() {
            problems.push("provider: provider and model are required".to_string());
        }

        let mut blocks = HashSet::new();
        for block in &self.code_blocks {
            if block.id.trim().is_empty() {
                problems.push("codeBlocks: block with empty id".to_string());
            } else if !blocks.insert(block.id.as_str()) {
                problems.push(format!("codeBlocks: duplicate id '{}'", block.id));
            }
            if block.code.trim().is_empty() {
                problems.push(format!("codeBlocks: '{}' has no code", block.id));
            }
        }

        problems.extend(self.graph.problems(&blocks));

        if let Err(PolicyError::Invalid(policy_problems)) = self.permissions.validate() {
            problems.extend(policy_problems.into_iter().map(|p| format!("permissions.{p}")));
        }
        for module in &self.permissions.code_exec.allowed_modules {
            if !AVAILABLE_MODULES.contains(&module.as_str()) {
                problems.push(format!(
                    "permissions.codeExec.allowedModules: unknown module '{module}'"
                ));
            }
        }
        problems
    }

    pub fn validate(&self) -> Result<(), WardenError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(WardenError::Validation(format!(
                "agent '{}' is invalid: {}",
                self.name,
                problems.join("; ")
            )))
        }
    }
}
