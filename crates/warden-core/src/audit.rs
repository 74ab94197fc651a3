//! Best-effort audit mirroring for one run.

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use warden_policy::redact::{audit_projection, redact_text};
use warden_store::{AuditOutcome, AuditSink, NewAuditEntry};

/// Writes redacted, size-capped audit entries for a run.
///
/// Failures are logged and swallowed; auditing never changes the outcome of a run.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Option<Arc<dyn AuditSink>>,
    agent_id: String,
    run_id: String,
    payload_cap: usize,
}

impl AuditRecorder {
    pub fn new(
        sink: Option<Arc<dyn AuditSink>>,
        agent_id: impl Into<String>,
        run_id: impl Into<String>,
        payload_cap: usize,
    ) -> Self {
        Self {
            sink,
            agent_id: agent_id.into(),
            run_id: run_id.into(),
            payload_cap,
        }
    }

    /// Recorder that writes nothing (agents with auditing turned off).
    pub fn disabled(agent_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::new(None, agent_id, run_id, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub async fn record(
        &self,
        event_type: &str,
        tool_name: Option<&str>,
        payload: &Value,
        outcome: AuditOutcome,
        error: Option<&str>,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };
        let mut entry = NewAuditEntry::new(&self.agent_id, &self.run_id, event_type, outcome)
            .with_payload(audit_projection(payload, self.payload_cap));
        if let Some(tool) = tool_name {
            entry = entry.with_tool(tool);
        }
        if let Some(error) = error {
            entry = entry.with_error(redact_text(error));
        }
        if let Err(e) = sink.append(entry).await {
            warn!(run_id = %self.run_id, event_type, error = %e, "Failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use warden_store::{AuditEntry, AuditFilter, AuditPage, MemoryAuditStore, StoreError};

    #[tokio::test]
    async fn test_records_redacted_entries() {
        let store = Arc::new(MemoryAuditStore::new());
        let recorder = AuditRecorder::new(Some(store.clone()), "a1", "r1", 4096);
        recorder
            .record(
                "tool-call",
                Some("http_request"),
                &json!({"headers": {"Authorization": "Bearer abcdefghijklmnop"}}),
                AuditOutcome::Error,
                Some("failed with token=hunter2"),
            )
            .await;

        let entries = store.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload["headers"]["Authorization"], "[REDACTED]");
        assert!(!entries[0].error.as_deref().unwrap().contains("hunter2"));
        assert_eq!(entries[0].tool_name.as_deref(), Some("http_request"));
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
            Err(StoreError::InvalidFormat("disk full".to_string()))
        }
        async fn query(&self, _filter: &AuditFilter) -> Result<AuditPage, StoreError> {
            Ok(AuditPage::default())
        }
        async fn clear(&self, _filter: Option<&AuditFilter>) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let recorder = AuditRecorder::new(Some(Arc::new(FailingSink)), "a1", "r1", 4096);
        recorder
            .record("run-started", None, &Value::Null, AuditOutcome::Success, None)
            .await;
        assert!(!AuditRecorder::disabled("a1", "r1").is_enabled());
    }
}
