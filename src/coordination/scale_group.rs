//! # Scale Groups
//!
//! Process-wide concurrency caps shared by every workflow. A step that names a scale group
//! must hold a slot of that group for its whole action invocation, retries included.
//!
//! Each group is its own slot guarded by its own mutex; admission is a single
//! test-and-increment under that lock. Waiters park on the group's `Notify` and re-poll on a
//! fixed interval so a missed wake-up only costs one interval.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Snapshot of a scale group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleGroupStatus {
    pub max_instances: u32,
    pub current: u32,
}

#[derive(Debug)]
struct ScaleGroupSlot {
    counts: Mutex<ScaleGroupStatus>,
    released: Notify,
}

impl ScaleGroupSlot {
    fn new(max_instances: u32) -> Self {
        Self {
            counts: Mutex::new(ScaleGroupStatus {
                max_instances,
                current: 0,
            }),
            released: Notify::new(),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut counts = self.counts.lock();
        if counts.current < counts.max_instances {
            counts.current += 1;
            true
        } else {
            false
        }
    }

    fn release(&self) {
        {
            let mut counts = self.counts.lock();
            counts.current = counts.current.saturating_sub(1);
        }
        self.released.notify_one();
    }

    fn status(&self) -> ScaleGroupStatus {
        *self.counts.lock()
    }
}

/// Admission control keyed by scale group id
#[derive(Debug)]
pub struct ConcurrencyGate {
    groups: DashMap<String, Arc<ScaleGroupSlot>>,
    default_max_instances: u32,
    poll_interval: Duration,
}

impl ConcurrencyGate {
    pub fn new(default_max_instances: u32, poll_interval: Duration) -> Self {
        Self {
            groups: DashMap::new(),
            default_max_instances,
            poll_interval,
        }
    }

    fn slot(&self, scale_group_id: &str) -> Arc<ScaleGroupSlot> {
        if let Some(slot) = self.groups.get(scale_group_id) {
            return slot.clone();
        }
        self.groups
            .entry(scale_group_id.to_string())
            .or_insert_with(|| Arc::new(ScaleGroupSlot::new(self.default_max_instances)))
            .clone()
    }

    /// Set the maximum number of outstanding actions for a group
    ///
    /// Lowering the maximum below `current` revokes nothing; new admissions wait until enough
    /// holders have released.
    pub fn set_max(&self, scale_group_id: &str, max_instances: u32) {
        let slot = self.slot(scale_group_id);
        slot.counts.lock().max_instances = max_instances;
        slot.released.notify_waiters();

        info!(
            scale_group_id = %scale_group_id,
            max_instances = max_instances,
            "⚖️ Scale group maximum set"
        );
    }

    /// Check `current < max` and increment in one step
    pub fn try_acquire(&self, scale_group_id: &str) -> bool {
        self.slot(scale_group_id).try_acquire()
    }

    /// Release one slot; `current` never drops below zero
    pub fn release(&self, scale_group_id: &str) {
        if let Some(slot) = self.groups.get(scale_group_id).map(|slot| slot.clone()) {
            slot.release();
        }
    }

    /// Wait for a slot, returning a permit that releases it on drop
    pub async fn acquire(&self, scale_group_id: &str) -> ScaleGroupPermit {
        let slot = self.slot(scale_group_id);
        let mut waited = false;

        loop {
            let notified = slot.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if slot.try_acquire() {
                if waited {
                    debug!(scale_group_id = %scale_group_id, "Scale group slot acquired after waiting");
                }
                return ScaleGroupPermit {
                    scale_group_id: scale_group_id.to_string(),
                    slot: Arc::clone(&slot),
                };
            }

            if !waited {
                debug!(
                    scale_group_id = %scale_group_id,
                    status = ?slot.status(),
                    "⏳ Scale group full, waiting for a slot"
                );
                waited = true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    pub fn status(&self, scale_group_id: &str) -> Option<ScaleGroupStatus> {
        self.groups
            .get(scale_group_id)
            .map(|slot| slot.status())
    }

    pub fn list_all(&self) -> BTreeMap<String, ScaleGroupStatus> {
        self.groups
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect()
    }
}

/// Held scale-group slot, released when dropped
#[derive(Debug)]
pub struct ScaleGroupPermit {
    scale_group_id: String,
    slot: Arc<ScaleGroupSlot>,
}

impl ScaleGroupPermit {
    pub fn scale_group_id(&self) -> &str {
        &self.scale_group_id
    }
}

impl Drop for ScaleGroupPermit {
    fn drop(&mut self) {
        self.slot.release();
        debug!(scale_group_id = %self.scale_group_id, "Scale group slot released");
    }
}
