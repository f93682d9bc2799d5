use super::{
    errors::{StateMachineError, StateMachineResult},
    events::StepEvent,
    states::StepExecutionState,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Progress record of one step in one run iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub state: StepExecutionState,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl StepRecord {
    fn pending() -> Self {
        Self {
            state: StepExecutionState::Pending,
            attempts: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Arena of step execution states keyed by `(run_id, step_id)`
///
/// Each branch task owns the transitions of its own step; the arena makes that progress
/// visible to run reports and diagnostics without replaying the branch.
#[derive(Debug, Default)]
pub struct StepStateArena {
    records: DashMap<(String, i32), StepRecord>,
}

impl StepStateArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step as scheduled, returns false if it already had a record in this run
    pub fn schedule(&self, run_id: &str, step_id: i32) -> bool {
        let key = (run_id.to_string(), step_id);
        if let Some(existing) = self.records.get(&key) {
            warn!(
                run_id = %run_id,
                step_id = step_id,
                state = %existing.state,
                "Step scheduled again within the same run"
            );
            return false;
        }
        self.records.insert(key, StepRecord::pending());
        true
    }

    /// Apply an event to a step, returning the new state
    pub fn transition(
        &self,
        run_id: &str,
        step_id: i32,
        event: StepEvent,
    ) -> StateMachineResult<StepExecutionState> {
        let key = (run_id.to_string(), step_id);
        let mut record = self
            .records
            .get_mut(&key)
            .ok_or_else(|| StateMachineError::UnknownStep {
                run_id: run_id.to_string(),
                step_id,
            })?;

        let target = Self::determine_target_state(record.state, event).ok_or_else(|| {
            StateMachineError::InvalidTransition {
                run_id: run_id.to_string(),
                step_id,
                from: record.state,
                event: event.to_string(),
            }
        })?;

        debug!(
            run_id = %run_id,
            step_id = step_id,
            from = %record.state,
            to = %target,
            "Step state transition"
        );

        record.state = target;
        record.updated_at = Utc::now();
        Ok(target)
    }

    /// Determine the target state for an event, `None` if the transition is not allowed
    pub fn determine_target_state(
        current: StepExecutionState,
        event: StepEvent,
    ) -> Option<StepExecutionState> {
        use StepExecutionState as S;

        let target = match (current, event) {
            (S::Pending, StepEvent::Admit) => S::Admitted,
            (S::Pending, StepEvent::Skip) => S::Skipped,
            (S::Admitted, StepEvent::Start) => S::Executing,
            (S::Executing, StepEvent::Succeed) => S::Succeeded,
            (S::Executing, StepEvent::Fail) => S::Failed,
            // webhook wait happens after the action succeeded
            (S::Succeeded, StepEvent::Fail) => S::Failed,

            (S::Pending | S::Succeeded | S::Failed | S::Skipped, StepEvent::Propagate) => {
                S::Propagated
            }

            (S::Pending | S::Admitted | S::Executing | S::Succeeded, StepEvent::Halt) => {
                S::Halted
            }

            _ => return None,
        };
        Some(target)
    }

    pub fn record_attempt(&self, run_id: &str, step_id: i32) -> u32 {
        match self.records.get_mut(&(run_id.to_string(), step_id)) {
            Some(mut record) => {
                record.attempts += 1;
                record.updated_at = Utc::now();
                record.attempts
            }
            None => 0,
        }
    }

    pub fn get(&self, run_id: &str, step_id: i32) -> Option<StepRecord> {
        self.records
            .get(&(run_id.to_string(), step_id))
            .map(|record| record.clone())
    }

    pub fn state(&self, run_id: &str, step_id: i32) -> Option<StepExecutionState> {
        self.get(run_id, step_id).map(|record| record.state)
    }

    /// All step states recorded for a run, ordered by step id
    pub fn snapshot(&self, run_id: &str) -> BTreeMap<i32, StepExecutionState> {
        self.records
            .iter()
            .filter(|entry| entry.key().0 == run_id)
            .map(|entry| (entry.key().1, entry.value().state))
            .collect()
    }

    /// Drop every record of a run, returns the number removed
    pub fn clear_run(&self, run_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|(run, _), _| run != run_id);
        before.saturating_sub(self.records.len())
    }
}
