//! # Audit Log
//!
//! Observability seam for step outcomes, orchestration start/end markers and errors.
//! Writes are infallible from the orchestrator's point of view; the branch or run that emits
//! an entry awaits it, so a run is only reported terminated after its audit writes finished.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

/// Terminal outcome of one step execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    /// Failed, but `stop_on_failure` was off so children were still credited
    FailedContinued { message: String },
    Failed { message: String },
    Halted,
    Skipped,
}

impl StepOutcome {
    /// Whether the step credited its children
    pub fn fanned_out(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::FailedContinued { .. } | Self::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepLogEntry {
    pub project_id: String,
    pub run_id: String,
    pub step_id: i32,
    pub outcome: StepOutcome,
    pub attempts: u32,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationPhase {
    Started,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestrationLogEntry {
    pub project_id: String,
    pub instance_id: String,
    pub global_key: String,
    pub phase: OrchestrationPhase,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorLogEntry {
    pub project_id: String,
    pub step_id: i32,
    pub run_id: String,
    pub message: String,
    /// The error ended the whole run rather than one branch
    pub fatal: bool,
    pub logged_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log_step(&self, entry: StepLogEntry);

    async fn log_orchestration(&self, entry: OrchestrationLogEntry);

    async fn log_error(&self, entry: ErrorLogEntry);
}

/// Audit log that only emits tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn log_step(&self, entry: StepLogEntry) {
        info!(
            project_id = %entry.project_id,
            run_id = %entry.run_id,
            step_id = entry.step_id,
            attempts = entry.attempts,
            outcome = ?entry.outcome,
            "📝 STEP_LOG"
        );
    }

    async fn log_orchestration(&self, entry: OrchestrationLogEntry) {
        info!(
            project_id = %entry.project_id,
            instance_id = %entry.instance_id,
            global_key = %entry.global_key,
            phase = ?entry.phase,
            "📋 {}",
            entry.message
        );
    }

    async fn log_error(&self, entry: ErrorLogEntry) {
        if entry.fatal {
            error!(
                project_id = %entry.project_id,
                run_id = %entry.run_id,
                step_id = entry.step_id,
                "❌ {}",
                entry.message
            );
        } else {
            warn!(
                project_id = %entry.project_id,
                run_id = %entry.run_id,
                step_id = entry.step_id,
                "⚠️ {}",
                entry.message
            );
        }
    }
}

/// Audit log that keeps every entry in memory, in write order
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    steps: Mutex<Vec<StepLogEntry>>,
    orchestrations: Mutex<Vec<OrchestrationLogEntry>>,
    errors: Mutex<Vec<ErrorLogEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> Vec<StepLogEntry> {
        self.steps.lock().clone()
    }

    pub fn steps_for_run(&self, run_id: &str) -> Vec<StepLogEntry> {
        self.steps
            .lock()
            .iter()
            .filter(|entry| entry.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Ids of steps that completed and fanned out in a run, in completion order
    pub fn completed_steps(&self, run_id: &str) -> Vec<i32> {
        self.steps_for_run(run_id)
            .into_iter()
            .filter(|entry| entry.outcome.fanned_out())
            .map(|entry| entry.step_id)
            .collect()
    }

    pub fn orchestrations(&self) -> Vec<OrchestrationLogEntry> {
        self.orchestrations.lock().clone()
    }

    pub fn errors(&self) -> Vec<ErrorLogEntry> {
        self.errors.lock().clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn log_step(&self, entry: StepLogEntry) {
        self.steps.lock().push(entry);
    }

    async fn log_orchestration(&self, entry: OrchestrationLogEntry) {
        self.orchestrations.lock().push(entry);
    }

    async fn log_error(&self, entry: ErrorLogEntry) {
        self.errors.lock().push(entry);
    }
}
