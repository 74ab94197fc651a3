//! Read file tool — reads file contents with optional line offset/limit.

use crate::error::ToolError;
use crate::path_guard::resolve_path;
use crate::traits::{parse_params, Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use warden_policy::{ActionRequest, FsOperation};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReadFileParams {
    /// File path to read (absolute, or relative to the working directory).
    pub path: String,
    /// Line offset (0-indexed). Default: 0.
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum number of lines to return. Default: all.
    #[serde(default)]
    pub limit: Option<usize>,
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn label(&self) -> &str {
        "Read File"
    }
    fn description(&self) -> &str {
        "Read the contents of a text file. Supports line offset and limit."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(ReadFileParams))
            .expect("schema serialization should not fail")
    }

    async fn prepare(
        &self,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ActionRequest, ToolError> {
        let params: ReadFileParams = parse_params(args)?;
        let path = resolve_path(Path::new(&params.path), &ctx.working_dir)?;
        // Unknown size (missing file, directory) is left for the policy to reject.
        let size_bytes = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            _ => None,
        };
        Ok(ActionRequest::Filesystem {
            operation: FsOperation::Read,
            path: path.display().to_string(),
            size_bytes,
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: ReadFileParams = parse_params(&args)?;
        let path = resolve_path(Path::new(&params.path), &ctx.working_dir)?;

        let max_bytes = ctx.permissions.filesystem.max_file_size_bytes;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Failed to read file: {e}")))?;
        if meta.len() > max_bytes {
            return Err(ToolError::PermissionDenied(format!(
                "file size {} exceeds limit of {max_bytes} bytes",
                meta.len()
            )));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Failed to read file: {e}")))?;

        if params.offset.is_none() && params.limit.is_none() {
            let bytes = content.len();
            return Ok(ToolResult::success_with_metadata(
                content,
                serde_json::json!({"bytes": bytes}),
            ));
        }

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let offset = params.offset.unwrap_or(0).min(total_lines);
        let end = params
            .limit
            .map_or(total_lines, |limit| offset.saturating_add(limit).min(total_lines));

        Ok(ToolResult::success_with_metadata(
            lines[offset..end].join("\n"),
            serde_json::json!({
                "totalLines": total_lines,
                "offset": offset,
                "linesShown": end - offset,
            }),
        ))
    }
}
