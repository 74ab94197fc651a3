//! Write file tool — creates, overwrites or appends to files.

use crate::error::ToolError;
use crate::path_guard::resolve_path;
use crate::traits::{parse_params, Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use warden_policy::{ActionRequest, FsOperation};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct WriteFileParams {
    /// File path to write (absolute, or relative to the working directory).
    pub path: String,
    /// Content to write to the file.
    pub content: String,
    /// Append instead of overwriting. Default: false.
    #[serde(default)]
    pub append: bool,
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn label(&self) -> &str {
        "Write File"
    }
    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Creates parent directories if needed."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(WriteFileParams))
            .expect("schema serialization should not fail")
    }

    async fn prepare(
        &self,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ActionRequest, ToolError> {
        let params: WriteFileParams = parse_params(args)?;
        let path = resolve_path(Path::new(&params.path), &ctx.working_dir)?;
        let mut size_bytes = params.content.len() as u64;
        if params.append {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                size_bytes += meta.len();
            }
        }
        Ok(ActionRequest::Filesystem {
            operation: FsOperation::Write,
            path: path.display().to_string(),
            size_bytes: Some(size_bytes),
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: WriteFileParams = parse_params(&args)?;
        let path = resolve_path(Path::new(&params.path), &ctx.working_dir)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::ExecutionError(format!("Failed to create directories: {e}"))
            })?;
        }

        let bytes = params.content.len();
        if params.append {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| ToolError::ExecutionError(format!("Failed to open file: {e}")))?;
            file.write_all(params.content.as_bytes())
                .await
                .map_err(|e| ToolError::ExecutionError(format!("Failed to write file: {e}")))?;
            file.flush().await?;
        } else {
            tokio::fs::write(&path, &params.content)
                .await
                .map_err(|e| ToolError::ExecutionError(format!("Failed to write file: {e}")))?;
        }

        Ok(ToolResult::success_with_metadata(
            format!("Wrote {bytes} bytes to {}", path.display()),
            serde_json::json!({"bytes": bytes, "path": path.display().to_string()}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_ctx(dir: &TempDir) -> ToolContext {
        ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_prepare_uses_payload_size() {
        let dir = TempDir::new().unwrap();
        let request = WriteFileTool
            .prepare(
                &serde_json::json!({"path": "out/new.txt", "content": "hello"}),
                &test_ctx(&dir),
            )
            .await
            .unwrap();
        let expected = dir.path().canonicalize().unwrap().join("out/new.txt");
        assert_eq!(
            request,
            ActionRequest::Filesystem {
                operation: FsOperation::Write,
                path: expected.display().to_string(),
                size_bytes: Some(5),
            }
        );
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let result = WriteFileTool
            .execute(
                serde_json::json!({"path": "a/b/c.txt", "content": "data"}),
                &test_ctx(&dir),
            )
            .await
            .unwrap();

        assert!(!result.is_error);
        let written = std::fs::read_to_string(dir.path().join("a/b/c.txt")).unwrap();
        assert_eq!(written, "data");
    }

    #[tokio::test]
    async fn test_append() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("log.txt"), "one\n").unwrap();

        let ctx = test_ctx(&dir);
        let args = serde_json::json!({"path": "log.txt", "content": "two\n", "append": true});
        let request = WriteFileTool.prepare(&args, &ctx).await.unwrap();
        assert!(matches!(
            request,
            ActionRequest::Filesystem {
                size_bytes: Some(8),
                ..
            }
        ));

        WriteFileTool.execute(args, &ctx).await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("log.txt")).unwrap();
        assert_eq!(written, "one\ntwo\n");
    }
}
