//! Progress events pushed to the UI while a run executes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunEventType {
    RunStarted,
    NodeStarted,
    NodeCompleted,
    NodeError,
    LlmChunk,
    ToolCall,
    ToolResult,
    RequiresConfirmation,
    SecurityWarning,
    RunCompleted,
    RunError,
}

impl RunEventType {
    /// Exactly one terminal event ends every run.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunEventType::RunCompleted | RunEventType::RunError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunEventType::RunStarted => "run-started",
            RunEventType::NodeStarted => "node-started",
            RunEventType::NodeCompleted => "node-completed",
            RunEventType::NodeError => "node-error",
            RunEventType::LlmChunk => "llm-chunk",
            RunEventType::ToolCall => "tool-call",
            RunEventType::ToolResult => "tool-result",
            RunEventType::RequiresConfirmation => "requires-confirmation",
            RunEventType::SecurityWarning => "security-warning",
            RunEventType::RunCompleted => "run-completed",
            RunEventType::RunError => "run-error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    #[serde(rename = "type")]
    pub event_type: RunEventType,
    pub run_id: String,
    /// Unix milliseconds.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl RunEvent {
    pub fn new(event_type: RunEventType, run_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            run_id: run_id.into(),
            timestamp: crate::now_ms(),
            node_id: None,
            data,
        }
    }

    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

/// Sending half of the run event channel.
pub type EventSender = mpsc::UnboundedSender<RunEvent>;
/// Receiving half of the run event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<RunEvent>;

/// Emits events for one run. A closed channel is ignored; runs never depend on a listener.
#[derive(Clone)]
pub struct RunEmitter {
    run_id: String,
    sender: EventSender,
}

impl RunEmitter {
    pub fn new(run_id: impl Into<String>, sender: EventSender) -> Self {
        Self {
            run_id: run_id.into(),
            sender,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event_type: RunEventType, data: Value) {
        let _ = self
            .sender
            .send(RunEvent::new(event_type, self.run_id.clone(), data));
    }

    pub fn emit_node(&self, event_type: RunEventType, node_id: &str, data: Value) {
        let _ = self
            .sender
            .send(RunEvent::new(event_type, self.run_id.clone(), data).for_node(node_id));
    }
}
