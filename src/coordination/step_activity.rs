//! # Step Activity
//!
//! Number of branches currently executing a given step of a project, across all runs.

use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct StepActivityTracker {
    in_progress: DashMap<(String, i32), u32>,
}

impl StepActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a step as in progress until the returned guard drops
    pub fn enter(self: &Arc<Self>, project_id: &str, step_id: i32) -> StepActivityGuard {
        *self
            .in_progress
            .entry((project_id.to_string(), step_id))
            .or_insert(0) += 1;

        StepActivityGuard {
            tracker: Arc::clone(self),
            project_id: project_id.to_string(),
            step_id,
        }
    }

    pub fn in_progress(&self, project_id: &str, step_id: i32) -> u32 {
        self.in_progress
            .get(&(project_id.to_string(), step_id))
            .map_or(0, |count| *count)
    }

    fn leave(&self, project_id: &str, step_id: i32) {
        let key = (project_id.to_string(), step_id);
        if let Some(mut count) = self.in_progress.get_mut(&key) {
            *count = count.saturating_sub(1);
        }
        self.in_progress.remove_if(&key, |_, count| *count == 0);
    }
}

#[derive(Debug)]
pub struct StepActivityGuard {
    tracker: Arc<StepActivityTracker>,
    project_id: String,
    step_id: i32,
}

impl Drop for StepActivityGuard {
    fn drop(&mut self) {
        self.tracker.leave(&self.project_id, self.step_id);
    }
}
