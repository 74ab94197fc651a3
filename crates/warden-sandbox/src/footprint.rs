//! Approximate memory held by a script's live variables.
//!
//! Per-value engine limits stop one string or array from growing past its
//! cap, but not a script from keeping many capped values alive at once. The
//! meter walks the scope on variable access and fails the script once the
//! total passes the budget.

use rhai::{Array, Blob, Dynamic, EvalAltResult, Map, Position, Scope};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Inline size of one `Dynamic` slot.
const DYNAMIC_BYTES: usize = 16;
const STRING_OVERHEAD: usize = 32;
const MAP_ENTRY_OVERHEAD: usize = 48;
/// Values nested deeper than this are refused rather than measured.
const MAX_NESTING: usize = 128;
/// Fewest variable accesses between two measurements.
const MIN_INTERVAL: usize = 16;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footprint {
    pub bytes: usize,
    /// Values visited, i.e. the cost of measuring.
    pub values: usize,
    pub too_deep: bool,
}

impl Footprint {
    pub fn of_scope(scope: &Scope) -> Self {
        let mut footprint = Self::default();
        for (name, _, value) in scope.iter_raw() {
            footprint.grow(name.len() + DYNAMIC_BYTES);
            footprint.add(value, 0);
        }
        footprint
    }

    fn grow(&mut self, bytes: usize) {
        self.bytes = self.bytes.saturating_add(bytes);
    }

    fn add(&mut self, value: &Dynamic, depth: usize) {
        self.values += 1;
        if depth > MAX_NESTING {
            self.too_deep = true;
            return;
        }
        if value.is_string() {
            if let Ok(text) = value.clone().into_immutable_string() {
                self.grow(text.len() + STRING_OVERHEAD);
            }
            return;
        }
        if let Some(array) = value.read_lock::<Array>() {
            for item in array.iter() {
                self.grow(DYNAMIC_BYTES);
                self.add(item, depth + 1);
            }
            return;
        }
        if let Some(map) = value.read_lock::<Map>() {
            for (key, item) in map.iter() {
                self.grow(key.len() + MAP_ENTRY_OVERHEAD);
                self.add(item, depth + 1);
            }
            return;
        }
        if let Some(blob) = value.read_lock::<Blob>() {
            self.grow(blob.len());
        }
    }
}

/// Checks the scope against a byte budget, re-measuring after a number of
/// accesses proportional to the last measurement's cost.
#[derive(Debug)]
pub(crate) struct MemoryMeter {
    budget: usize,
    accesses: AtomicUsize,
    next_check: AtomicUsize,
}

impl MemoryMeter {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            accesses: AtomicUsize::new(0),
            next_check: AtomicUsize::new(0),
        }
    }

    pub fn observe(&self, scope: &Scope) -> Result<(), Box<EvalAltResult>> {
        let seen = self.accesses.fetch_add(1, Ordering::Relaxed);
        if seen < self.next_check.load(Ordering::Relaxed) {
            return Ok(());
        }

        let footprint = Footprint::of_scope(scope);
        if footprint.too_deep {
            return Err(data_too_large("Nesting of retained values"));
        }
        if footprint.bytes > self.budget {
            return Err(data_too_large("Total retained data"));
        }
        let interval = (footprint.values / 8).max(MIN_INTERVAL);
        self.next_check.store(seen + interval, Ordering::Relaxed);
        Ok(())
    }
}

fn data_too_large(what: &str) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorDataTooLarge(what.to_string(), Position::NONE))
}
