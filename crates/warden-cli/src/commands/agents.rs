//! `warden agents`: list, inspect, import, export and delete agents.

use super::{resolve_agent, Workspace};
use crate::cli::AgentsAction;
use anyhow::Context as _;
use std::path::Path;
use warden_core::{export_json, import_json, AgentSummary};
use warden_store::DocumentStore;

pub async fn run(workspace: &Workspace, action: AgentsAction) -> anyhow::Result<()> {
    let store = workspace.agents();
    match action {
        AgentsAction::List => {
            let summaries: Vec<AgentSummary> =
                store.list().await?.iter().map(|a| a.summary()).collect();
            print_agent_list(&summaries);
        }
        AgentsAction::Show { agent } => {
            let agent = resolve_agent(&store, &agent).await?;
            println!("{}", serde_json::to_string_pretty(&agent)?);
        }
        AgentsAction::Import { file } => {
            let agent = import_json(&read_document(&file)?)?;
            store.save(&agent.id, &agent).await?;
            tracing::info!(agent_id = %agent.id, "Imported agent");
            println!("Imported '{}' as {}", agent.name, agent.id);
        }
        AgentsAction::Export { agent, output } => {
            let agent = resolve_agent(&store, &agent).await?;
            let document = export_json(&agent)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, document)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported '{}' to {}", agent.name, path.display());
                }
                None => println!("{document}"),
            }
        }
        AgentsAction::Validate { file } => {
            let agent = import_json(&read_document(&file)?)?;
            println!(
                "'{}' is valid: {} steps, {} code blocks",
                agent.name,
                agent.graph.steps.len(),
                agent.code_blocks.len()
            );
        }
        AgentsAction::Delete { agent } => {
            let agent = resolve_agent(&store, &agent).await?;
            store.delete(&agent.id).await?;
            println!("Deleted '{}' ({})", agent.name, agent.id);
        }
    }
    Ok(())
}

fn read_document(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_agent_list(summaries: &[AgentSummary]) {
    if summaries.is_empty() {
        println!("No agents found.");
        return;
    }
    for s in summaries {
        println!("{} | {} | {} steps | {}", s.id, s.name, s.steps, s.description);
    }
}
