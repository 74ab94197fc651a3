//! The capability host: the only way sandboxed code reaches the outside world.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A side effect requested from inside a code block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum CapabilityCall {
    HttpGet { url: String },
    HttpPost { url: String, body: Value },
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    ListDir { path: String },
    Exec { command: String },
}

impl CapabilityCall {
    /// Method name as seen by scripts.
    pub fn name(&self) -> &'static str {
        match self {
            CapabilityCall::HttpGet { .. } => "http_get",
            CapabilityCall::HttpPost { .. } => "http_post",
            CapabilityCall::ReadFile { .. } => "read_file",
            CapabilityCall::WriteFile { .. } => "write_file",
            CapabilityCall::ListDir { .. } => "list_dir",
            CapabilityCall::Exec { .. } => "exec",
        }
    }
}

/// Failure of a capability call. Surfaces in scripts as a catchable error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("Permission denied: {0}")]
    Denied(String),
    #[error("{0}")]
    Failed(String),
}

/// Executes capability calls on behalf of a script.
///
/// Implementations route every call through the same policy checks that
/// apply to tool steps before performing any effect.
#[async_trait]
pub trait CapabilityHost: Send + Sync {
    async fn call(&self, call: CapabilityCall) -> Result<Value, CapabilityError>;
}

/// Host that refuses every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAllHost;

#[async_trait]
impl CapabilityHost for DenyAllHost {
    async fn call(&self, call: CapabilityCall) -> Result<Value, CapabilityError> {
        Err(CapabilityError::Denied(format!(
            "{} is not available in this context",
            call.name()
        )))
    }
}
