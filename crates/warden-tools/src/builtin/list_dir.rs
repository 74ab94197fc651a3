//! List directory tool.

use crate::error::ToolError;
use crate::path_guard::resolve_path;
use crate::traits::{parse_params, Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use warden_policy::{ActionRequest, FsOperation};

const MAX_ENTRIES: usize = 1000;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListDirParams {
    /// Directory to list (absolute, or relative to the working directory).
    pub path: String,
}

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn label(&self) -> &str {
        "List Directory"
    }
    fn description(&self) -> &str {
        "List the entries of a directory. Subdirectories end with '/'."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(ListDirParams))
            .expect("schema serialization should not fail")
    }

    async fn prepare(
        &self,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ActionRequest, ToolError> {
        let params: ListDirParams = parse_params(args)?;
        let path = resolve_path(Path::new(&params.path), &ctx.working_dir)?;
        Ok(ActionRequest::Filesystem {
            operation: FsOperation::List,
            path: path.display().to_string(),
            size_bytes: None,
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: ListDirParams = parse_params(&args)?;
        let path = resolve_path(Path::new(&params.path), &ctx.working_dir)?;

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Failed to list directory: {e}")))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        let total = entries.len();
        let truncated = total > MAX_ENTRIES;
        entries.truncate(MAX_ENTRIES);

        Ok(ToolResult::success_with_metadata(
            entries.join("\n"),
            serde_json::json!({
                "entries": entries,
                "total": total,
                "truncated": truncated,
            }),
        ))
    }
}
