//! Human-in-the-loop confirmation of individual actions.
//!
//! A step that needs approval opens a [`PendingConfirmation`] and waits on
//! it. The decision arrives from the UI through [`ConfirmBroker::resolve`],
//! matched by run and confirmation id. Each pending entry owns a oneshot
//! sender; removing the entry from the map under the lock is what claims the
//! right to answer, so a decision is delivered at most once.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};
use warden_policy::{ActionKey, ActionRequest};

/// Default time a step waits for a decision.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// The user's answer to a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    /// Run this action once.
    AllowOnce,
    /// Run this action and identical ones for the rest of the run.
    AllowSession,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Decision::Deny)
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResult {
    Decided(Decision),
    TimedOut,
    /// The run was cancelled or finished while waiting.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmError {
    #[error("No pending confirmation '{confirmation_id}' for run '{run_id}'")]
    NotFound {
        run_id: String,
        confirmation_id: String,
    },
}

struct PendingEntry {
    key: ActionKey,
    sender: oneshot::Sender<Decision>,
}

#[derive(Default)]
struct RunConfirmations {
    pending: HashMap<String, PendingEntry>,
    session_approved: HashSet<ActionKey>,
}

#[derive(Default)]
struct BrokerState {
    runs: HashMap<String, RunConfirmations>,
}

/// Pending-decision registry shared by every active run.
#[derive(Clone, Default)]
pub struct ConfirmBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl ConfirmBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a confirmation request for `request` in `run_id`.
    pub fn open(&self, run_id: &str, request: &ActionRequest) -> PendingConfirmation {
        let id = ulid::Ulid::new().to_string();
        let key = request.key();
        let (sender, receiver) = oneshot::channel();
        self.lock()
            .runs
            .entry(run_id.to_string())
            .or_default()
            .pending
            .insert(
                id.clone(),
                PendingEntry {
                    key: key.clone(),
                    sender,
                },
            );
        debug!(run_id, confirmation_id = %id, key = %key, "Opened confirmation");

        let (command, url, path) = request.target();
        PendingConfirmation {
            id,
            run_id: run_id.to_string(),
            action: request.tool().to_string(),
            description: request.describe(),
            parameters: request.display_parameters(),
            command,
            url,
            path,
            key,
            receiver,
            broker: self.clone(),
        }
    }

    /// Deliver a decision. Fails when the id is unknown or already answered.
    pub fn resolve(
        &self,
        run_id: &str,
        confirmation_id: &str,
        decision: Decision,
    ) -> Result<(), ConfirmError> {
        let mut state = self.lock();
        let run = state.runs.get_mut(run_id);
        let entry = run
            .and_then(|r| {
                let entry = r.pending.remove(confirmation_id)?;
                if decision == Decision::AllowSession {
                    r.session_approved.insert(entry.key.clone());
                }
                Some(entry)
            })
            .ok_or_else(|| ConfirmError::NotFound {
                run_id: run_id.to_string(),
                confirmation_id: confirmation_id.to_string(),
            })?;
        drop(state);

        info!(run_id, confirmation_id, ?decision, key = %entry.key, "Confirmation resolved");
        // The waiter may have timed out in the meantime; nothing left to tell it.
        let _ = entry.sender.send(decision);
        Ok(())
    }

    /// Whether an identical action was approved with `allow-session` in this run.
    pub fn is_session_approved(&self, run_id: &str, key: &ActionKey) -> bool {
        self.lock()
            .runs
            .get(run_id)
            .is_some_and(|r| r.session_approved.contains(key))
    }

    /// Reject every pending confirmation of a cancelled run. Returns how many were pending.
    pub fn cancel_run(&self, run_id: &str) -> usize {
        let removed = self.lock().runs.remove(run_id);
        let count = removed.map_or(0, |r| r.pending.len());
        if count > 0 {
            info!(run_id, count, "Rejected pending confirmations of cancelled run");
        }
        count
    }

    /// Drop all confirmation state of a finished run.
    pub fn finish_run(&self, run_id: &str) {
        self.lock().runs.remove(run_id);
    }

    /// Ids of confirmations still waiting in `run_id`.
    pub fn pending_ids(&self, run_id: &str) -> Vec<String> {
        self.lock()
            .runs
            .get(run_id)
            .map(|r| r.pending.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn discard(&self, run_id: &str, confirmation_id: &str) {
        if let Some(run) = self.lock().runs.get_mut(run_id) {
            run.pending.remove(confirmation_id);
        }
    }
}

/// A confirmation request awaiting a decision.
pub struct PendingConfirmation {
    pub id: String,
    pub run_id: String,
    /// Tool family of the action (`shell`, `http`, ...).
    pub action: String,
    /// Redacted human-readable summary.
    pub description: String,
    pub parameters: Value,
    pub command: Option<String>,
    pub url: Option<String>,
    pub path: Option<String>,
    key: ActionKey,
    receiver: oneshot::Receiver<Decision>,
    broker: ConfirmBroker,
}

impl PendingConfirmation {
    pub fn key(&self) -> &ActionKey {
        &self.key
    }

    /// Payload of the `requires-confirmation` event.
    pub fn event_data(&self) -> Value {
        let mut data = serde_json::json!({
            "confirmationId": self.id,
            "action": self.action,
            "description": self.description,
            "parameters": self.parameters,
        });
        for (field, value) in [("command", &self.command), ("url", &self.url), ("path", &self.path)] {
            if let Some(value) = value {
                data[field] = Value::String(value.clone());
            }
        }
        data
    }

    /// Wait for the decision. A timeout removes the request so a late answer gets `NotFound`.
    pub async fn wait(self, timeout: Duration) -> ConfirmationResult {
        let PendingConfirmation {
            id,
            run_id,
            receiver,
            broker,
            ..
        } = self;
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(decision)) => ConfirmationResult::Decided(decision),
            Ok(Err(_)) => ConfirmationResult::Cancelled,
            Err(_) => {
                broker.discard(&run_id, &id);
                info!(run_id, confirmation_id = %id, "Confirmation timed out");
                ConfirmationResult::TimedOut
            }
        }
    }
}
