//! `warden check`: dry-run policy evaluation.

use super::{resolve_agent, ExitError, Workspace};
use crate::cli::CheckAction;
use serde_json::json;
use std::sync::Arc;
use warden_policy::{ActionRequest, PolicyEvaluator, Verdict};
use warden_tools::{ToolContext, ToolRegistry};

pub async fn run(workspace: &Workspace, agent_key: &str, action: CheckAction) -> anyhow::Result<()> {
    let agent = resolve_agent(&workspace.agents(), agent_key).await?;
    let ctx = ToolContext {
        working_dir: match &workspace.config.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        },
        run_id: "check".to_string(),
        permissions: Arc::new(agent.permissions.clone()),
        ..ToolContext::default()
    };

    let request = build_request(&ToolRegistry::with_builtins(), action, &ctx).await?;
    let verdict = PolicyEvaluator::new().evaluate(&request, &ctx.permissions);

    println!("action: {}", request.describe());
    match verdict {
        Verdict::Allow => println!("verdict: allow"),
        Verdict::RequireConfirmation { description, .. } => {
            println!("verdict: requires confirmation ({description})")
        }
        Verdict::Deny { reason } => {
            println!("verdict: deny");
            return Err(anyhow::Error::new(ExitError::new(1, reason)));
        }
    }
    Ok(())
}

/// Describe `action` the way the matching tool would before running it.
async fn build_request(
    tools: &ToolRegistry,
    action: CheckAction,
    ctx: &ToolContext,
) -> anyhow::Result<ActionRequest> {
    let (tool_name, args) = match action {
        CheckAction::Code { block } => return Ok(ActionRequest::CodeExec { block }),
        CheckAction::Read { path } => ("read_file", json!({"path": path})),
        CheckAction::Write { path, bytes } => (
            "write_file",
            json!({"path": path, "content": "x".repeat(bytes)}),
        ),
        CheckAction::List { path } => ("list_dir", json!({"path": path})),
        CheckAction::Http { url, method } => ("http_request", json!({"url": url, "method": method})),
        CheckAction::Shell { command } => ("shell", json!({"command": command})),
    };
    let tool = tools
        .get(tool_name)
        .ok_or_else(|| anyhow::anyhow!("Unknown tool: {tool_name}"))?;
    tools.validate_args(tool_name, &args)?;
    Ok(tool.prepare(&args, ctx).await?)
}
