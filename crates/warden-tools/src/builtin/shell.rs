//! Shell tool — runs an allow-listed command without a shell.

use crate::error::ToolError;
use crate::traits::{parse_params, Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use warden_policy::{split_command_line, ActionRequest};
use warden_sandbox::{run_command, CommandSpec, SandboxError};

const MAX_OUTPUT_BYTES: usize = 50 * 1024; // 50KB

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ShellParams {
    /// Command line to execute. Quotes group words; no pipes, redirection or substitution.
    pub command: String,
}

pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }
    fn label(&self) -> &str {
        "Shell"
    }
    fn description(&self) -> &str {
        "Execute an allow-listed command and return stdout/stderr."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(ShellParams))
            .expect("schema serialization should not fail")
    }

    async fn prepare(
        &self,
        args: &serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ActionRequest, ToolError> {
        let params: ShellParams = parse_params(args)?;
        Ok(ActionRequest::Shell {
            command: params.command.trim().to_string(),
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let params: ShellParams = parse_params(&args)?;
        let policy = &ctx.permissions.shell;

        let argv = split_command_line(&params.command)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;
        let cwd = policy
            .working_directory
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| ctx.working_dir.clone());
        let timeout_ms = policy.timeout_ms;

        let mut spec = CommandSpec::from_argv(&argv, cwd, Duration::from_millis(timeout_ms))
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?
            .with_env(policy.env.clone());
        spec.max_output_bytes = MAX_OUTPUT_BYTES;

        let output = run_command(&spec).await.map_err(|e| match e {
            SandboxError::Timeout(_) => {
                ToolError::Timeout(format!("Command timed out after {timeout_ms}ms"))
            }
            other => ToolError::ExecutionError(other.to_string()),
        })?;

        let mut text = output.stdout.clone();
        if !output.stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("STDERR:\n");
            text.push_str(&output.stderr);
        }
        if text.is_empty() {
            text = "(no output)".to_string();
        }

        let is_error = !output.success;
        if is_error {
            text = format!("Exit code: {}\n{text}", output.exit_code);
        }

        Ok(ToolResult {
            output: text,
            metadata: serde_json::json!({
                "exitCode": output.exit_code,
                "stdout": output.stdout,
                "stderr": output.stderr,
                "truncated": output.truncated,
            }),
            is_error,
        })
    }
}
