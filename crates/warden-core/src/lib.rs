//! warden-core: Agent definitions, the action gate, confirmations, and the run coordinator.

pub mod agent;
pub mod audit;
pub mod config;
pub mod confirm;
mod error;
pub mod events;
pub mod gate;
pub mod graph;
pub mod portable;
pub mod runner;
pub mod template;

pub use agent::{AgentDefinition, AgentSummary, CodeBlock};
pub use config::{Config, ConfigStore};
pub use confirm::{ConfirmBroker, ConfirmError, ConfirmationResult, Decision};
pub use error::WardenError;
pub use events::{EventReceiver, RunEvent, RunEventType};
pub use graph::{Edge, Graph, MatchMode, Operator, Predicate, Step, StepKind};
pub use portable::{export_agent, export_json, import_agent, import_json, PortableAgent, EXPORT_FORMAT};
pub use runner::{AgentStore, ConfirmAck, Runner, RunnerConfig, StartAck, StopAck};
pub use template::{render, Variables};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
