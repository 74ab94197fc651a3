//! `warden run`: execute an agent and stream its events.

use super::{resolve_agent, ExitError, Workspace};
use crate::cli::AutoDecision;
use serde_json::Value;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use warden_core::{Decision, RunEvent, RunEventType, Runner, RunnerConfig};
use warden_provider::ProviderRegistry;
use warden_tools::ToolRegistry;

/// `warden run` options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub json: bool,
    pub auto: Option<AutoDecision>,
    pub confirm_timeout: Option<u64>,
    pub run_id: Option<String>,
}

pub async fn run(
    workspace: &Workspace,
    agent_key: &str,
    message: &str,
    options: RunOptions,
) -> anyhow::Result<()> {
    let agents = Arc::new(workspace.agents());
    let agent = resolve_agent(agents.as_ref(), agent_key).await?;
    let audit = Arc::new(workspace.audit().await?);

    let mut config = RunnerConfig::from_config(&workspace.config);
    if let Some(secs) = options.confirm_timeout {
        config.confirmation_timeout = Duration::from_secs(secs);
    }
    let (runner, mut events) = Runner::new(
        agents,
        ProviderRegistry::with_echo(),
        ToolRegistry::with_builtins(),
        audit,
        config,
    );

    let ack = runner
        .start(&agent.id, message, options.run_id.clone())
        .await?;
    let run_id = ack.run_id;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => return Err(anyhow::anyhow!("event channel closed before the run finished")),
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping run {run_id}...");
                runner.stop(&run_id);
                continue;
            }
        };
        if event.run_id != run_id {
            continue;
        }

        if options.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }

        match event.event_type {
            RunEventType::RequiresConfirmation => {
                let decision = match options.auto {
                    Some(auto) => Decision::from(auto),
                    None => prompt_decision(&event.data, &mut stdin).await?,
                };
                let confirmation_id = event.data["confirmationId"].as_str().unwrap_or_default();
                if let Err(e) = runner.confirm(&run_id, confirmation_id, decision) {
                    // Timed out while the prompt was open.
                    eprintln!("{e}");
                }
            }
            RunEventType::RunCompleted => return Ok(()),
            RunEventType::RunError => {
                let reason = event.data["reason"].as_str().unwrap_or("run failed");
                return Err(anyhow::Error::new(ExitError::new(1, reason)));
            }
            _ => {}
        }
    }
}

async fn prompt_decision<R>(
    data: &Value,
    stdin: &mut tokio::io::Lines<R>,
) -> anyhow::Result<Decision>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        eprint!("Allow? [o]nce / [s]ession / [d]eny: ");
        std::io::stderr().flush()?;
        let Some(line) = stdin.next_line().await? else {
            // No terminal to ask.
            return Ok(Decision::Deny);
        };
        match parse_decision(&line) {
            Some(decision) => return Ok(decision),
            None => eprintln!(
                "Please answer o, s or d for: {}",
                data["description"].as_str().unwrap_or("this action")
            ),
        }
    }
}

fn parse_decision(answer: &str) -> Option<Decision> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "o" | "once" | "y" | "yes" => Some(Decision::AllowOnce),
        "s" | "session" => Some(Decision::AllowSession),
        "d" | "deny" | "n" | "no" => Some(Decision::Deny),
        _ => None,
    }
}

/// Human-readable progress on stderr; the final output goes to stdout.
fn print_event(event: &RunEvent) {
    let node = event.node_id.as_deref().unwrap_or("-");
    let data = &event.data;
    match event.event_type {
        RunEventType::RunStarted => {
            eprintln!("run {} started ({})", event.run_id, text(&data["agentName"]));
        }
        RunEventType::NodeStarted => eprintln!("[{node}] {}", text(&data["type"])),
        RunEventType::LlmChunk => {
            eprint!("{}", text(&data["delta"]));
        }
        RunEventType::ToolCall => {
            eprintln!("[{node}] {} {}", text(&data["tool"]), text(&data["action"]));
        }
        RunEventType::ToolResult => {
            let status = if data["isError"].as_bool() == Some(true) {
                "error"
            } else {
                "ok"
            };
            eprintln!("[{node}] {} {status}", text(&data["tool"]));
        }
        RunEventType::RequiresConfirmation => {
            eprintln!("[{node}] confirmation required: {}", text(&data["description"]));
            if let Ok(params) = serde_json::to_string_pretty(&data["parameters"]) {
                eprintln!("{params}");
            }
        }
        RunEventType::SecurityWarning => {
            eprintln!("[{node}] denied: {}", text(&data["reason"]));
        }
        RunEventType::NodeError => eprintln!("[{node}] error: {}", text(&data["error"])),
        RunEventType::NodeCompleted => {
            if let Some(logs) = data["logs"].as_array() {
                for line in logs {
                    eprintln!("[{node}] log: {}", text(line));
                }
            }
        }
        RunEventType::RunCompleted => match &data["output"] {
            Value::String(output) => println!("{output}"),
            other => println!("{other}"),
        },
        RunEventType::RunError => {
            if data["cancelled"].as_bool() == Some(true) {
                eprintln!("run {} cancelled", event.run_id);
            }
        }
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
