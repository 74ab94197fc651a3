use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use warden_policy::redact::DEFAULT_PAYLOAD_CAP;

/// Serialized settings from ~/.warden/config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Where agents, the audit log and secrets live. Defaults to `~/.warden`.
    pub data_dir: Option<PathBuf>,
    /// How long a step waits for a confirmation decision.
    pub confirmation_timeout_secs: u64,
    /// Cap on each serialized audit payload, in bytes.
    pub audit_payload_cap: usize,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Working directory for tool calls. Defaults to the process working directory.
    pub working_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            confirmation_timeout_secs: 300,
            audit_payload_cap: DEFAULT_PAYLOAD_CAP,
            log_filter: "warn".to_string(),
            working_dir: None,
        }
    }
}

impl Config {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(warden_store::default_data_dir)
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.data_dir().join("agents")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir().join("audit.jsonl")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.data_dir().join("secrets.json")
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Helper struct for storing the location to read/write global settings
pub struct ConfigStore {
    path: PathBuf,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            path: warden_store::default_data_dir().join("config.json"),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the user's saved config, or fallback to Default
    pub fn load(&self) -> Config {
        if let Ok(content) = fs::read_to_string(&self.path) {
            match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable config"),
            }
        }
        Config::default()
    }

    /// Save the user's config back to disk
    pub fn save(&self, config: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)
    }
}
