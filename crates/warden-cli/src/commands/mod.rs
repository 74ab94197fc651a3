//! Command implementations.

pub mod agents;
pub mod audit;
pub mod check;
pub mod run;
pub mod secrets;
pub mod tools;

use anyhow::Context as _;
use warden_core::{AgentDefinition, Config};
use warden_store::{DocumentStore, FileSecretStore, JsonFileStore, JsonlAuditStore};

/// Typed error used to propagate deterministic process exit codes.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Stores rooted at the configured data directory.
pub struct Workspace {
    pub config: Config,
}

impl Workspace {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn agents(&self) -> JsonFileStore<AgentDefinition> {
        JsonFileStore::new(self.config.agents_dir())
    }

    pub async fn audit(&self) -> anyhow::Result<JsonlAuditStore> {
        let path = self.config.audit_log_path();
        JsonlAuditStore::open(&path)
            .await
            .with_context(|| format!("Failed to open audit log {}", path.display()))
    }

    pub fn secrets(&self) -> FileSecretStore {
        FileSecretStore::new(self.config.secrets_path())
    }
}

/// Find a stored agent by id, falling back to an exact name match.
pub async fn resolve_agent(
    store: &dyn DocumentStore<AgentDefinition>,
    key: &str,
) -> anyhow::Result<AgentDefinition> {
    if let Some(agent) = store.get(key).await? {
        return Ok(agent);
    }
    let mut matches: Vec<AgentDefinition> = store
        .list()
        .await?
        .into_iter()
        .filter(|a| a.name == key)
        .collect();
    match matches.len() {
        0 => Err(anyhow::anyhow!("Unknown agent: {key}")),
        1 => Ok(matches.remove(0)),
        n => Err(anyhow::anyhow!(
            "{n} agents are named '{key}'; use the agent id instead"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_store::MemoryDocumentStore;

    #[tokio::test]
    async fn test_resolve_agent_by_id_or_name() {
        let store = MemoryDocumentStore::new();
        let agent = AgentDefinition::new("helper");
        store.save(&agent.id, &agent).await.unwrap();

        assert_eq!(resolve_agent(&store, &agent.id).await.unwrap().id, agent.id);
        assert_eq!(resolve_agent(&store, "helper").await.unwrap().id, agent.id);
        assert!(resolve_agent(&store, "nobody").await.is_err());

        let twin = AgentDefinition::new("helper");
        store.save(&twin.id, &twin).await.unwrap();
        let err = resolve_agent(&store, "helper").await.unwrap_err();
        assert!(err.to_string().contains("use the agent id"));
    }
}
