//! Error types for the warden-core crate.

use warden_policy::PolicyError;
use warden_provider::ProviderError;
use warden_store::StoreError;
use warden_tools::ToolError;

/// Top-level error for agent management and runs.
///
/// Confirmation timeouts and cancellations are denials: the action did not run.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Invalid agent definition, template or request
    #[error("Validation error: {0}")]
    Validation(String),

    /// The permission model or the user refused the action
    #[error("Permission denied: {0}")]
    PolicyDenied(String),

    #[error("Confirmation timed out")]
    ConfirmationTimeout,

    #[error("Confirmation cancelled")]
    ConfirmationCancelled,

    /// Code block failure, already normalized by the runtime
    #[error("Code block failed: {0}")]
    Sandbox(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The run was stopped
    #[error("Run cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A fault in the runtime itself, such as a panicked run task
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Whether the error means an action was refused rather than attempted.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            WardenError::PolicyDenied(_)
                | WardenError::ConfirmationTimeout
                | WardenError::ConfirmationCancelled
        )
    }
}

impl From<PolicyError> for WardenError {
    fn from(err: PolicyError) -> Self {
        WardenError::Validation(err.to_string())
    }
}
