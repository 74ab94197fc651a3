//! Error types for the warden-store crate.

/// Errors that can occur in persistent storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data could not be parsed
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
