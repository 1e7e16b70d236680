//! Process-wide named counter registry (§9 design note: "Global statistics registry").
//!
//! A single append-only map of named atomic counters, initialized lazily at first use and
//! injectable for tests (each [`StatsRegistry`] instance is independent; the process-wide
//! default lives behind [`global`]).

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

/// A thread-safe, append-only collection of named counters.
#[derive(Default)]
pub struct StatsRegistry {
    counters: DashMap<&'static str, AtomicI64, crate::HashState>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            counters: DashMap::with_hasher(crate::HashState::default()),
        }
    }

    /// Adds `delta` to the named counter, creating it (initialized to 0) if it does not exist yet
    pub fn add(&self, name: &'static str, delta: i64) {
        self.counters
            .entry(name)
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Returns the current value of the named counter, or 0 if it was never touched
    pub fn get(&self, name: &'static str) -> i64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Resets every counter back to zero (does not remove the names), used between test cases
    pub fn reset(&self) {
        for entry in self.counters.iter() {
            entry.value().store(0, Ordering::Relaxed);
        }
    }
}

static GLOBAL: OnceLock<StatsRegistry> = OnceLock::new();

/// Returns the process-wide stats registry, initializing it on first access
pub fn global() -> &'static StatsRegistry {
    GLOBAL.get_or_init(StatsRegistry::new)
}
