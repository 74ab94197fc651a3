//! Resource limits for code blocks and child processes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Extra time the host waits past the script deadline before abandoning the worker.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(250);

/// Limits applied to one code block execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLimits {
    /// Memory budget in megabytes, mapped onto engine data limits.
    pub memory_limit_mb: u32,
    /// Wall-clock deadline.
    #[serde(with = "duration_ms", rename = "timeLimitMs")]
    pub timeout: Duration,
    /// Outer host timeout slack on top of `timeout`.
    #[serde(with = "duration_ms", rename = "graceMs")]
    pub grace: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 64,
            timeout: Duration::from_secs(5),
            grace: DEFAULT_GRACE,
        }
    }
}

impl ExecutionLimits {
    pub fn new(memory_limit_mb: u32, time_limit_ms: u64) -> Self {
        Self {
            memory_limit_mb,
            timeout: Duration::from_millis(time_limit_ms),
            grace: DEFAULT_GRACE,
        }
    }

    /// Engine data limits derived from the memory budget.
    pub fn engine_limits(&self) -> EngineLimits {
        EngineLimits::from_memory_mb(self.memory_limit_mb)
    }
}

/// Interpreter limits. The engine has no allocator hook, so memory is bounded
/// by capping the size of every value a script can build and the total held
/// by its live variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Longest string, in bytes.
    pub max_string_size: usize,
    /// Most elements in one array.
    pub max_array_size: usize,
    /// Most entries in one object map.
    pub max_map_size: usize,
    /// Approximate bytes all live variables may hold together.
    pub max_retained_bytes: usize,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    /// Most log lines kept from `print`, `debug` and `ctx.log`.
    pub max_log_lines: usize,
}

impl EngineLimits {
    pub fn from_memory_mb(memory_mb: u32) -> Self {
        let bytes = (memory_mb.max(1) as usize).saturating_mul(1024 * 1024);
        Self {
            max_string_size: (bytes / 4).max(1024),
            // A Dynamic is 16 bytes; leave headroom for nested values.
            max_array_size: (bytes / 64).max(64),
            max_map_size: (bytes / 128).max(64),
            max_retained_bytes: bytes,
            // Unoptimized builds use far more native stack per script call.
            max_call_levels: if cfg!(debug_assertions) { 8 } else { 64 },
            max_expr_depth: if cfg!(debug_assertions) { 32 } else { 64 },
            max_function_expr_depth: if cfg!(debug_assertions) { 16 } else { 32 },
            max_log_lines: 1000,
        }
    }
}

/// Buffer that stops accepting bytes past its limit and records the truncation.
#[derive(Debug, Clone)]
pub struct LimitedBuffer {
    buffer: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl LimitedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        let remaining = self.limit.saturating_sub(self.buffer.len());
        let to_write = data.len().min(remaining);
        self.buffer.extend_from_slice(&data[..to_write]);
        if to_write < data.len() {
            self.truncated = true;
        }
    }

    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Lossy UTF-8 view with a marker appended when output was cut.
    pub fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.buffer).into_owned();
        if self.truncated {
            text.push_str("\n... [output truncated] ...");
        }
        text
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
