//! Append-only audit log of action outcomes.
//!
//! Entries are written by the run coordinator and only ever read back for
//! display. Payloads arrive already redacted and size-capped.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Result of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Denied,
    Error,
}

/// A stored audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Monotonic id assigned by the sink.
    pub id: u64,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub agent_id: String,
    pub run_id: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub payload: Value,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An entry before the sink assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub agent_id: String,
    pub run_id: String,
    pub event_type: String,
    pub tool_name: Option<String>,
    pub payload: Value,
    pub outcome: AuditOutcome,
    pub error: Option<String>,
}

impl NewAuditEntry {
    pub fn new(
        agent_id: impl Into<String>,
        run_id: impl Into<String>,
        event_type: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            run_id: run_id.into(),
            event_type: event_type.into(),
            tool_name: None,
            payload: Value::Null,
            outcome,
            error: None,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    fn into_entry(self, id: u64, timestamp: u64) -> AuditEntry {
        AuditEntry {
            id,
            timestamp,
            agent_id: self.agent_id,
            run_id: self.run_id,
            event_type: self.event_type,
            tool_name: self.tool_name,
            payload: self.payload,
            outcome: self.outcome,
            error: self.error,
        }
    }
}

/// Query filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AuditOutcome>,
    /// Inclusive lower bound on the timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Exclusive upper bound on the timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    /// Entries to skip (query only).
    #[serde(default)]
    pub offset: usize,
    /// Maximum entries returned (query only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.agent_id.as_ref().map_or(true, |a| *a == entry.agent_id)
            && self.run_id.as_ref().map_or(true, |r| *r == entry.run_id)
            && self
                .event_type
                .as_ref()
                .map_or(true, |t| *t == entry.event_type)
            && self.outcome.map_or(true, |o| o == entry.outcome)
            && self.since.map_or(true, |s| entry.timestamp >= s)
            && self.until.map_or(true, |u| entry.timestamp < u)
    }
}

/// One page of query results, newest first. `total` counts every match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: usize,
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append an entry. Returns once the entry is durable.
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError>;

    /// Matching entries, newest first, paged by `offset` and `limit`.
    async fn query(&self, filter: &AuditFilter) -> Result<AuditPage, StoreError>;

    /// Remove matching entries (all entries when `filter` is `None`).
    /// Returns the number removed.
    async fn clear(&self, filter: Option<&AuditFilter>) -> Result<usize, StoreError>;
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn page(mut matching: Vec<AuditEntry>, filter: &AuditFilter) -> AuditPage {
    let total = matching.len();
    matching.sort_by(|a, b| b.id.cmp(&a.id));
    let entries = matching
        .into_iter()
        .skip(filter.offset)
        .take(filter.limit.unwrap_or(usize::MAX))
        .collect();
    AuditPage { entries, total }
}

fn should_clear(filter: Option<&AuditFilter>, entry: &AuditEntry) -> bool {
    filter.map_or(true, |f| f.matches(entry))
}

/// In-memory sink for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    inner: Mutex<MemoryLog>,
}

#[derive(Debug, Default)]
struct MemoryLog {
    entries: Vec<AuditEntry>,
    last_id: u64,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry in id order.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().await.entries.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let mut log = self.inner.lock().await;
        log.last_id += 1;
        let entry = entry.into_entry(log.last_id, now_ms());
        log.entries.push(entry.clone());
        Ok(entry)
    }

    async fn query(&self, filter: &AuditFilter) -> Result<AuditPage, StoreError> {
        let log = self.inner.lock().await;
        let matching = log
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(page(matching, filter))
    }

    async fn clear(&self, filter: Option<&AuditFilter>) -> Result<usize, StoreError> {
        let mut log = self.inner.lock().await;
        let before = log.entries.len();
        log.entries.retain(|e| !should_clear(filter, e));
        Ok(before - log.entries.len())
    }
}

/// JSON-lines audit log on disk. One entry per line, fsynced on append.
pub struct JsonlAuditStore {
    path: PathBuf,
    last_id: Mutex<u64>,
}

impl JsonlAuditStore {
    /// Open (or create) the log at `path`, recovering the last assigned id.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let last_id = read_entries(&path)
            .await?
            .iter()
            .map(|e| e.id)
            .max()
            .unwrap_or(0);
        tracing::debug!(path = %path.display(), last_id, "Opened audit log");
        Ok(Self {
            path,
            last_id: Mutex::new(last_id),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, StoreError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entries = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => entries.push(entry),
            // A torn final line after a crash is skipped rather than poisoning the log.
            Err(e) => tracing::warn!(line = line_num + 1, error = %e, "Skipping unreadable audit line"),
        }
    }
    Ok(entries)
}

#[async_trait]
impl AuditSink for JsonlAuditStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let mut last_id = self.last_id.lock().await;
        let entry = entry.into_entry(*last_id + 1, now_ms());
        let line = serde_json::to_string(&entry)?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.sync_data().await?;

        *last_id = entry.id;
        Ok(entry)
    }

    async fn query(&self, filter: &AuditFilter) -> Result<AuditPage, StoreError> {
        let _guard = self.last_id.lock().await;
        let matching = read_entries(&self.path)
            .await?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        Ok(page(matching, filter))
    }

    async fn clear(&self, filter: Option<&AuditFilter>) -> Result<usize, StoreError> {
        let _guard = self.last_id.lock().await;
        let entries = read_entries(&self.path).await?;
        let before = entries.len();
        let kept: Vec<AuditEntry> = entries
            .into_iter()
            .filter(|e| !should_clear(filter, e))
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut content = String::new();
        for entry in &kept {
            content.push_str(&serde_json::to_string(entry)?);
            content.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &self.path).await?;
        tracing::info!(removed, "Cleared audit entries");
        Ok(removed)
    }
}
