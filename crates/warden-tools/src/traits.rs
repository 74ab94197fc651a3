//! Tool trait definition and common types.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use warden_policy::{ActionRequest, PermissionModel};

/// Context provided to tools during preparation and execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Base directory for relative paths.
    pub working_dir: PathBuf,
    /// Run the call belongs to.
    pub run_id: String,
    /// Upper bound for tools without a policy-specific timeout.
    pub timeout: Duration,
    /// Permission snapshot of the run. Tools read their limits from it.
    pub permissions: Arc<PermissionModel>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_default(),
            run_id: String::new(),
            timeout: Duration::from_secs(120),
            permissions: Arc::new(PermissionModel::deny_all()),
        }
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Output text.
    pub output: String,
    /// Optional metadata (e.g., status code, byte count).
    pub metadata: serde_json::Value,
    /// Whether the result represents an error.
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful tool result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: serde_json::Value::Null,
            is_error: false,
        }
    }

    /// Create a successful result with metadata.
    pub fn success_with_metadata(output: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            output: output.into(),
            metadata,
            is_error: false,
        }
    }

    /// Create an error tool result.
    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: serde_json::Value::Null,
            is_error: true,
        }
    }
}

/// Trait that all tools must implement.
///
/// A call goes through two phases. [`Tool::prepare`] describes the side
/// effect as an [`ActionRequest`] (resolving paths and sizes) so it can be
/// evaluated against the run's permissions; [`Tool::execute`] performs it and
/// is only invoked once that evaluation allowed it.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Machine-readable tool name (e.g., "read_file").
    fn name(&self) -> &str;

    /// Human-readable label (e.g., "Read File").
    fn label(&self) -> &str;

    /// Description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Describe the action this call would perform.
    async fn prepare(
        &self,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ActionRequest, ToolError>;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;
}

// Compile-time check: Tool must be object-safe
const _: () = {
    fn _assert_object_safe(_: &dyn Tool) {}
};

/// Deserialize tool parameters, mapping failures to [`ToolError::InvalidParameters`].
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(
    args: &serde_json::Value,
) -> Result<T, ToolError> {
    T::deserialize(args).map_err(|e| ToolError::InvalidParameters(e.to_string()))
}
