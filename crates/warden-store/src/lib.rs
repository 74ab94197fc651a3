//! warden-store: audit log, agent documents and secrets.

pub mod audit;
pub mod documents;
mod error;
pub mod secrets;

pub use audit::{
    AuditEntry, AuditFilter, AuditOutcome, AuditPage, AuditSink, JsonlAuditStore,
    MemoryAuditStore, NewAuditEntry,
};
pub use documents::{DocumentStore, JsonFileStore, MemoryDocumentStore};
pub use error::StoreError;
pub use secrets::{FileSecretStore, MemorySecretStore, SecretStatus, SecretStore};

use std::path::PathBuf;

/// Default data directory: `~/.warden`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".warden")
}
