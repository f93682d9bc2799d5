//! # Run State Store
//!
//! Ready/paused/stopped control values keyed by `(scope, key)`, plus custom step lists that
//! name the only steps of a global key allowed to run. Every write is last-write-wins
//! and wakes all branches currently waiting on a state change.

use crate::orchestration::control::ControlCommand;
use crate::state_machine::RunState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStateScope {
    Project,
    Global,
}

impl fmt::Display for RunStateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project => write!(f, "project"),
            Self::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StateKey {
    scope: RunStateScope,
    key: String,
}

#[derive(Debug)]
pub struct RunStateStore {
    states: DashMap<StateKey, RunState>,
    allowed_steps: DashMap<String, BTreeSet<i32>>,
    changed: Notify,
    poll_interval: Duration,
}

impl RunStateStore {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            states: DashMap::new(),
            allowed_steps: DashMap::new(),
            changed: Notify::new(),
            poll_interval,
        }
    }

    /// Current state of a key, unset keys are Ready
    pub fn get(&self, scope: RunStateScope, key: &str) -> RunState {
        self.states
            .get(&StateKey {
                scope,
                key: key.to_string(),
            })
            .map_or(RunState::Ready, |state| *state)
    }

    pub fn set(&self, scope: RunStateScope, key: &str, state: RunState) {
        self.states.insert(
            StateKey {
                scope,
                key: key.to_string(),
            },
            state,
        );
        info!(scope = %scope, key = %key, state = %state, "🚦 Run state changed");
        self.changed.notify_waiters();
    }

    pub fn set_ready(&self, scope: RunStateScope, key: &str) {
        self.set(scope, key, RunState::Ready);
    }

    pub fn set_paused(&self, scope: RunStateScope, key: &str) {
        self.set(scope, key, RunState::Paused);
    }

    pub fn set_stopped(&self, scope: RunStateScope, key: &str) {
        self.set(scope, key, RunState::Stopped);
    }

    /// Combined state for a branch: the most restrictive of project and global
    pub fn effective_state(&self, project_id: &str, global_key: Option<&str>) -> RunState {
        let project = self.get(RunStateScope::Project, project_id);
        match global_key {
            Some(global_key) => project.most_restrictive(self.get(RunStateScope::Global, global_key)),
            None => project,
        }
    }

    /// Suspend while paused; resolves with Ready or Stopped
    pub async fn wait_until_runnable(&self, project_id: &str, global_key: Option<&str>) -> RunState {
        let mut logged = false;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.effective_state(project_id, global_key);
            if state != RunState::Paused {
                return state;
            }

            if !logged {
                debug!(project_id = %project_id, global_key = ?global_key, "⏸️ Paused, waiting for ready or stop");
                logged = true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Resolves once a Stopped state is observed for the project or global key
    pub async fn wait_for_stop(&self, project_id: &str, global_key: Option<&str>) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.effective_state(project_id, global_key) == RunState::Stopped {
                return;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Apply a control-surface command and return the resulting state
    pub fn apply_control(&self, scope: RunStateScope, key: &str, command: ControlCommand) -> RunState {
        match command {
            ControlCommand::Ready => self.set_ready(scope, key),
            ControlCommand::Pause => self.set_paused(scope, key),
            ControlCommand::Stop => self.set_stopped(scope, key),
            ControlCommand::Get => {}
        }
        self.get(scope, key)
    }

    /// Restrict the steps executed for a global key to `step_ids`
    pub fn set_allowed_steps(&self, key: &str, step_ids: impl IntoIterator<Item = i32>) {
        let steps: BTreeSet<i32> = step_ids.into_iter().collect();
        info!(key = %key, steps = ?steps, "Custom step list set");
        self.allowed_steps.insert(key.to_string(), steps);
    }

    pub fn allowed_steps(&self, key: &str) -> Option<Vec<i32>> {
        self.allowed_steps
            .get(key)
            .map(|steps| steps.iter().copied().collect())
    }

    pub fn clear_allowed_steps(&self, key: &str) -> bool {
        self.allowed_steps.remove(key).is_some()
    }

    /// Without a custom step list every step is allowed
    pub fn is_step_allowed(&self, key: &str, step_id: i32) -> bool {
        self.allowed_steps
            .get(key)
            .map_or(true, |steps| steps.contains(&step_id))
    }
}
