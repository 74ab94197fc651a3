//! CLI argument and command definitions.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use warden_core::Decision;

#[derive(Parser)]
#[command(name = "warden", version, about = "Permission-gated agent runtime")]
pub struct Cli {
    /// Directory holding agents, the audit log and secrets (default: ~/.warden).
    #[arg(long, env = "WARDEN_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an agent on a message and stream its progress.
    Run {
        /// Agent id or name.
        agent: String,
        /// The user message passed to the input step.
        message: String,
        /// Print every run event as a JSON line.
        #[arg(long)]
        json: bool,
        /// Answer every confirmation without prompting.
        #[arg(long, value_enum)]
        auto: Option<AutoDecision>,
        /// Seconds to wait for a confirmation decision.
        #[arg(long, env = "WARDEN_CONFIRM_TIMEOUT")]
        confirm_timeout: Option<u64>,
        /// Explicit run id (default: a fresh ULID).
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Manage stored agents.
    Agents {
        #[command(subcommand)]
        action: AgentsAction,
    },

    /// Show the verdict an agent's permissions give an action, without performing it.
    Check {
        /// Agent id or name.
        agent: String,
        #[command(subcommand)]
        action: CheckAction,
    },

    /// Inspect or clear the audit log.
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Manage named secrets.
    Secrets {
        #[command(subcommand)]
        action: SecretsAction,
    },

    /// List built-in tools, or show one tool's parameter schema.
    Tools {
        /// Tool name.
        name: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AgentsAction {
    /// List stored agents.
    List,
    /// Print an agent definition as JSON.
    Show { agent: String },
    /// Import a portable agent document.
    Import { file: PathBuf },
    /// Export an agent as a portable document.
    Export {
        agent: String,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a portable agent document without importing it.
    Validate { file: PathBuf },
    /// Delete a stored agent.
    Delete { agent: String },
}

#[derive(Subcommand)]
pub enum CheckAction {
    /// Reading a file.
    Read { path: String },
    /// Writing a file of the given size.
    Write {
        path: String,
        #[arg(long, default_value_t = 0)]
        bytes: usize,
    },
    /// Listing a directory.
    List { path: String },
    /// An HTTP request.
    Http {
        url: String,
        #[arg(long, default_value = "GET")]
        method: String,
    },
    /// A shell command line.
    Shell { command: String },
    /// Running one of the agent's code blocks.
    Code { block: String },
}

#[derive(Subcommand)]
pub enum AuditAction {
    /// List audit entries, newest first.
    List {
        #[command(flatten)]
        filter: AuditFilterArgs,
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Print entries as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Delete audit entries matching the filter.
    Clear {
        #[command(flatten)]
        filter: AuditFilterArgs,
        /// Required to clear without a filter.
        #[arg(long)]
        all: bool,
    },
}

#[derive(clap::Args, Default)]
pub struct AuditFilterArgs {
    #[arg(long)]
    pub agent: Option<String>,
    #[arg(long)]
    pub run: Option<String>,
    /// Event type, e.g. `tool-call`.
    #[arg(long)]
    pub event: Option<String>,
    #[arg(long, value_enum)]
    pub outcome: Option<OutcomeArg>,
}

impl AuditFilterArgs {
    pub fn is_empty(&self) -> bool {
        self.agent.is_none() && self.run.is_none() && self.event.is_none() && self.outcome.is_none()
    }
}

#[derive(Subcommand)]
pub enum SecretsAction {
    /// Store a secret. Reads the value from stdin when omitted.
    Set { name: String, value: Option<String> },
    /// Show which secrets are set, never their values.
    Status {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove a secret.
    Delete { name: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AutoDecision {
    AllowOnce,
    AllowSession,
    Deny,
}

impl From<AutoDecision> for Decision {
    fn from(value: AutoDecision) -> Self {
        match value {
            AutoDecision::AllowOnce => Decision::AllowOnce,
            AutoDecision::AllowSession => Decision::AllowSession,
            AutoDecision::Deny => Decision::Deny,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutcomeArg {
    Success,
    Denied,
    Error,
}

impl From<OutcomeArg> for warden_store::AuditOutcome {
    fn from(value: OutcomeArg) -> Self {
        match value {
            OutcomeArg::Success => Self::Success,
            OutcomeArg::Denied => Self::Denied,
            OutcomeArg::Error => Self::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_auto_decision() {
        let cli = Cli::try_parse_from([
            "warden", "run", "helper", "hello", "--auto", "allow-session", "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { agent, auto, json, .. } => {
                assert_eq!(agent, "helper");
                assert_eq!(auto.map(Decision::from), Some(Decision::AllowSession));
                assert!(json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_check_http() {
        let cli = Cli::try_parse_from([
            "warden", "check", "helper", "http", "https://example.com", "--method", "POST",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Check {
                action: CheckAction::Http { ref method, .. },
                ..
            } if method == "POST"
        ));
    }
}
