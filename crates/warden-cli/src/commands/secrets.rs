//! `warden secrets`: store secrets and report which are set.

use super::Workspace;
use crate::cli::SecretsAction;
use tokio::io::{AsyncBufReadExt, BufReader};
use warden_store::SecretStore;

pub async fn run(workspace: &Workspace, action: SecretsAction) -> anyhow::Result<()> {
    let store = workspace.secrets();
    match action {
        SecretsAction::Set { name, value } => {
            let value = match value {
                Some(value) => value,
                None => read_value().await?,
            };
            if value.is_empty() {
                anyhow::bail!("Refusing to store an empty secret");
            }
            store.set_secret(&name, &value).await?;
            println!("Secret '{name}' set.");
        }
        SecretsAction::Status { names } => {
            let status = store.status(&names).await?;
            for (name, set) in &status.secrets {
                println!("{name}: {}", if *set { "set" } else { "not set" });
            }
        }
        SecretsAction::Delete { name } => {
            if store.delete_secret(&name).await? {
                println!("Secret '{name}' deleted.");
            } else {
                println!("Secret '{name}' was not set.");
            }
        }
    }
    Ok(())
}

/// First line of stdin, so values stay out of shell history.
async fn read_value() -> anyhow::Result<String> {
    eprint!("Value: ");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let line = lines.next_line().await?.unwrap_or_default();
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
