//! Sliding-window request counter for HTTP rate limiting.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Length of the rate-limit window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sliding 60-second window of accepted requests.
///
/// A request is accepted when fewer than `limit` requests were accepted in
/// the preceding 60 seconds. There is no reset boundary to burst across.
#[derive(Debug, Default)]
pub struct RateWindow {
    hits: Mutex<VecDeque<Instant>>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request if the window has room. Returns false when the limit is reached.
    pub fn try_acquire(&self, limit: u32) -> bool {
        self.try_acquire_at(limit, Instant::now())
    }

    /// Number of requests counted in the window ending now.
    pub fn in_window(&self) -> usize {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        evict(&mut hits, Instant::now());
        hits.len()
    }

    pub(crate) fn try_acquire_at(&self, limit: u32, now: Instant) -> bool {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        evict(&mut hits, now);
        if hits.len() >= limit as usize {
            return false;
        }
        hits.push_back(now);
        true
    }
}

fn evict(hits: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = hits.front() {
        if now.saturating_duration_since(*oldest) >= RATE_WINDOW {
            hits.pop_front();
        } else {
            break;
        }
    }
}
