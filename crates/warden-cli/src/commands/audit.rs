//! `warden audit`: query and clear the audit log.

use super::{ExitError, Workspace};
use crate::cli::{AuditAction, AuditFilterArgs};
use warden_store::{AuditEntry, AuditFilter, AuditSink};

pub async fn run(workspace: &Workspace, action: AuditAction) -> anyhow::Result<()> {
    let store = workspace.audit().await?;
    match action {
        AuditAction::List {
            filter,
            limit,
            offset,
            json,
        } => {
            let filter = AuditFilter {
                offset,
                limit: Some(limit),
                ..to_filter(filter)
            };
            let page = store.query(&filter).await?;
            if json {
                for entry in &page.entries {
                    println!("{}", serde_json::to_string(entry)?);
                }
            } else if page.entries.is_empty() {
                println!("No audit entries found.");
            } else {
                for entry in &page.entries {
                    println!("{}", format_entry(entry));
                }
                println!("({} of {} entries)", page.entries.len(), page.total);
            }
        }
        AuditAction::Clear { filter, all } => {
            if filter.is_empty() && !all {
                return Err(anyhow::Error::new(ExitError::new(
                    2,
                    "Refusing to clear the whole audit log without --all",
                )));
            }
            let removed = if filter.is_empty() {
                store.clear(None).await?
            } else {
                store.clear(Some(&to_filter(filter))).await?
            };
            println!("Removed {removed} audit entries.");
        }
    }
    Ok(())
}

fn to_filter(args: AuditFilterArgs) -> AuditFilter {
    AuditFilter {
        agent_id: args.agent,
        run_id: args.run,
        event_type: args.event,
        outcome: args.outcome.map(Into::into),
        ..AuditFilter::default()
    }
}

fn format_entry(entry: &AuditEntry) -> String {
    let outcome = serde_json::to_value(entry.outcome)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let mut line = format!(
        "#{} {} {} {} run={} agent={}",
        entry.id, entry.timestamp, entry.event_type, outcome, entry.run_id, entry.agent_id
    );
    if let Some(tool) = &entry.tool_name {
        line.push_str(&format!(" tool={tool}"));
    }
    if let Some(error) = &entry.error {
        line.push_str(&format!(" error={error:?}"));
    }
    line
}
