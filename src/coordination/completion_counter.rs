//! # Completion Counters
//!
//! Per-`(run_id, step_id)` count of parent branches that have completed. This is the only
//! synchronisation primitive behind fan-in: the parent whose increment reaches the edge
//! threshold owns the join and schedules the child.
//!
//! Increments for one key are serialised by the map shard holding that key, so concurrent
//! parents observe a strictly increasing, gap-free sequence. Unrelated keys do not contend
//! beyond sharing a shard.

use dashmap::DashMap;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    run_id: String,
    step_id: i32,
}

impl CounterKey {
    fn new(run_id: &str, step_id: i32) -> Self {
        Self {
            run_id: run_id.to_string(),
            step_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct CompletionCounterStore {
    counters: DashMap<CounterKey, u32>,
}

impl CompletionCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically add one completed parent and return the new count
    pub fn increment_and_get(&self, run_id: &str, step_id: i32) -> u32 {
        let mut entry = self
            .counters
            .entry(CounterKey::new(run_id, step_id))
            .or_insert(0);
        *entry += 1;
        let value = *entry;
        drop(entry);

        trace!(run_id = %run_id, step_id = step_id, completed_parents = value, "Completion counter incremented");
        value
    }

    pub fn get(&self, run_id: &str, step_id: i32) -> u32 {
        self.counters
            .get(&CounterKey::new(run_id, step_id))
            .map_or(0, |value| *value)
    }

    pub fn reset(&self, run_id: &str, step_id: i32) {
        self.counters.remove(&CounterKey::new(run_id, step_id));
    }

    /// Remove every counter of a run, returns how many were removed
    pub fn delete_run(&self, run_id: &str) -> usize {
        let before = self.counters.len();
        self.counters.retain(|key, _| key.run_id != run_id);
        before.saturating_sub(self.counters.len())
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
