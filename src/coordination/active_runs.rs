//! # Active Runs
//!
//! Instance ids of project runs that are currently executing. An instance id scopes the run ids
//! of every iteration, so two live runs must never share one.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ActiveRunRegistry {
    active: DashMap<String, String>,
}

impl ActiveRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `instance_id` for `project_id`; `None` when a live run already holds it
    pub fn try_register(
        self: &Arc<Self>,
        instance_id: &str,
        project_id: &str,
    ) -> Option<ActiveRunGuard> {
        match self.active.entry(instance_id.to_string()) {
            Entry::Occupied(held) => {
                debug!(
                    instance_id = %instance_id,
                    held_by = %held.get(),
                    "Instance id already active"
                );
                None
            }
            Entry::Vacant(vacant) => {
                vacant.insert(project_id.to_string());
                Some(ActiveRunGuard {
                    registry: Arc::clone(self),
                    instance_id: instance_id.to_string(),
                })
            }
        }
    }

    pub fn is_active(&self, instance_id: &str) -> bool {
        self.active.contains_key(instance_id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Registration of a live run, removed when dropped
#[derive(Debug)]
pub struct ActiveRunGuard {
    registry: Arc<ActiveRunRegistry>,
    instance_id: String,
}

impl ActiveRunGuard {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.registry.active.remove(&self.instance_id);
    }
}
