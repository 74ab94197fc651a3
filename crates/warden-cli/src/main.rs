//! warden: permission-gated agent runtime.
//!
//! Runs stored agents under their permission model, asks before sensitive
//! actions, and keeps an audit trail of what happened.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = warden_core::ConfigStore::new().load();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("warden=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let workspace = commands::Workspace::new(config);
    let result = match cli.command {
        Commands::Run {
            ref agent,
            ref message,
            json,
            auto,
            confirm_timeout,
            ref run_id,
        } => {
            let options = commands::run::RunOptions {
                json,
                auto,
                confirm_timeout,
                run_id: run_id.clone(),
            };
            commands::run::run(&workspace, agent, message, options).await
        }
        Commands::Agents { action } => commands::agents::run(&workspace, action).await,
        Commands::Check { ref agent, action } => {
            commands::check::run(&workspace, agent, action).await
        }
        Commands::Audit { action } => commands::audit::run(&workspace, action).await,
        Commands::Secrets { action } => commands::secrets::run(&workspace, action).await,
        Commands::Tools { ref name } => commands::tools::run(name.as_deref()),
    };

    if let Err(err) = result {
        if let Some(exit_err) = err.downcast_ref::<commands::ExitError>() {
            eprintln!("{}", exit_err.message);
            std::process::exit(exit_err.code);
        }
        return Err(err);
    }
    Ok(())
}
