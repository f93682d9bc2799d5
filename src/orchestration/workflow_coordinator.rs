//! # Workflow Coordinator
//!
//! Drives a project run: resolves the run identity, claims its instance id, waits until the
//! project and global key are runnable, then executes each loop iteration from the synthetic
//! root. A caller-supplied instance id runs as a singleton: a second start while the first is
//! live fails with `InstanceActive`.
//!
//! ## Scheduling
//!
//! Every step execution is its own tokio task in a per-iteration `JoinSet`. A finished task
//! hands back the children whose join threshold it reached and the driver spawns them, so the
//! driver is the only place new branches are created. An iteration ends when the set drains.
//! Counters and step records of the iteration are deleted before the next one starts.
//!
//! Branch-local errors are recorded in the iteration report and leave sibling branches
//! running. Any other error aborts the iteration's remaining tasks and is returned.

use crate::constants::{NO_STEP_ID, ROOT_STEP_ID};
use crate::error::{MicroflowError, Result};
use crate::logging::log_run_operation;
use crate::models::{CompiledGraph, ProjectRun, RunObject, RunRequest};
use crate::orchestration::step_orchestrator::{StepCompletion, StepOrchestrator};
use crate::state_machine::{RunState, StepExecutionState};
use crate::storage::{
    AuditLog, ErrorLogEntry, GraphStore, OrchestrationLogEntry, OrchestrationPhase, StepOutcome,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every iteration ran until its graph was exhausted
    Completed,
    /// A stop was observed; remaining iterations were not started
    Stopped,
    /// The project or global key was stopped before the run began
    NotStarted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Stopped => write!(f, "stopped"),
            Self::NotStarted => write!(f, "not_started"),
        }
    }
}

/// Outcome of one loop iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationReport {
    pub run_id: String,
    pub loop_index: u32,
    /// Steps whose action succeeded, in completion order
    pub executed: Vec<i32>,
    /// Steps whose action or webhook failed, whether or not they fanned out
    pub failed: Vec<i32>,
    pub halted: Vec<i32>,
    pub skipped: Vec<i32>,
    pub step_states: BTreeMap<i32, StepExecutionState>,
}

impl IterationReport {
    fn new(run: &RunObject) -> Self {
        Self {
            run_id: run.run_id.clone(),
            loop_index: run.loop_index,
            executed: Vec::new(),
            failed: Vec::new(),
            halted: Vec::new(),
            skipped: Vec::new(),
            step_states: BTreeMap::new(),
        }
    }

    fn record(&mut self, completion: &StepCompletion) {
        if completion.step_id == ROOT_STEP_ID {
            return;
        }
        match completion.outcome {
            StepOutcome::Succeeded => self.executed.push(completion.step_id),
            StepOutcome::FailedContinued { .. } | StepOutcome::Failed { .. } => {
                self.failed.push(completion.step_id)
            }
            StepOutcome::Halted => self.halted.push(completion.step_id),
            StepOutcome::Skipped => self.skipped.push(completion.step_id),
        }
    }

    pub fn was_halted(&self) -> bool {
        !self.halted.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub instance_id: String,
    pub project_id: String,
    pub global_key: String,
    pub status: RunStatus,
    pub iterations: Vec<IterationReport>,
}

pub struct WorkflowCoordinator {
    orchestrator: Arc<StepOrchestrator>,
    graph_store: Arc<dyn GraphStore>,
    audit: Arc<dyn AuditLog>,
}

impl fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl WorkflowCoordinator {
    pub fn new(
        orchestrator: StepOrchestrator,
        graph_store: Arc<dyn GraphStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            graph_store,
            audit,
        }
    }

    pub fn orchestrator(&self) -> &StepOrchestrator {
        &self.orchestrator
    }

    /// Start a project run and drive every loop iteration to completion
    #[instrument(skip(self, request), fields(project_id = %request.project_id))]
    pub async fn start_run(&self, request: RunRequest) -> Result<RunReport> {
        let project_run = ProjectRun::from_request(&request);

        let Some(_active) = self
            .orchestrator
            .services()
            .active_runs
            .try_register(&project_run.instance_id, &project_run.project_id)
        else {
            warn!(
                project_id = %project_run.project_id,
                instance_id = %project_run.instance_id,
                "Refusing to start: instance already running"
            );
            return Err(MicroflowError::InstanceActive {
                instance_id: project_run.instance_id,
            });
        };

        info!(
            project_id = %project_run.project_id,
            instance_id = %project_run.instance_id,
            global_key = %project_run.global_key,
            loop_count = project_run.loop_count,
            "🚀 Starting project run"
        );

        let graph = match self
            .graph_store
            .load_compiled_graph(&project_run.project_id)
            .await
        {
            Ok(graph) => graph,
            Err(error) => {
                self.log_fatal(&project_run, "", NO_STEP_ID, &error).await;
                return Err(error);
            }
        };

        self.log_orchestration(&project_run, OrchestrationPhase::Started, "Orchestration started")
            .await;

        let mut report = RunReport {
            instance_id: project_run.instance_id.clone(),
            project_id: project_run.project_id.clone(),
            global_key: project_run.global_key.clone(),
            status: RunStatus::Completed,
            iterations: Vec::new(),
        };

        for loop_index in 1..=project_run.loop_count {
            let state = self
                .orchestrator
                .services()
                .run_states
                .wait_until_runnable(&project_run.project_id, Some(&project_run.global_key))
                .await;
            if state == RunState::Stopped {
                report.status = if loop_index == 1 {
                    RunStatus::NotStarted
                } else {
                    RunStatus::Stopped
                };
                info!(
                    project_id = %project_run.project_id,
                    loop_index = loop_index,
                    status = %report.status,
                    "🛑 Stop observed before iteration"
                );
                break;
            }

            let run = project_run.iteration(loop_index);
            let iteration = match self.run_iteration(graph.clone(), run.clone()).await {
                Ok(iteration) => iteration,
                Err(error) => {
                    let step_id = error.step_id().unwrap_or_else(|| run.current_step_id());
                    self.log_fatal(&project_run, &run.run_id, step_id, &error).await;
                    self.log_orchestration(
                        &project_run,
                        OrchestrationPhase::Completed,
                        &format!("Orchestration failed: {error}"),
                    )
                    .await;
                    return Err(error);
                }
            };

            let halted = iteration.was_halted();
            report.iterations.push(iteration);
            if halted {
                report.status = RunStatus::Stopped;
                break;
            }
        }

        self.log_orchestration(
            &project_run,
            OrchestrationPhase::Completed,
            &format!("Orchestration {}", report.status),
        )
        .await;

        log_run_operation(
            "finish",
            &report.project_id,
            Some(&report.instance_id),
            &report.status.to_string(),
            Some(&format!("{} iteration(s)", report.iterations.len())),
        );
        Ok(report)
    }

    /// Execute one iteration of `graph` from the synthetic root
    #[instrument(skip(self, graph, run), fields(run_id = %run.run_id))]
    pub async fn run_iteration(
        &self,
        graph: Arc<CompiledGraph>,
        run: RunObject,
    ) -> Result<IterationReport> {
        let mut report = IterationReport::new(&run);
        let mut tasks: JoinSet<(i32, Result<StepCompletion>)> = JoinSet::new();
        let mut fatal = None;

        self.spawn_step(&mut tasks, &graph, ROOT_STEP_ID, &run);

        while let Some(joined) = tasks.join_next().await {
            let (step_id, result) = match joined {
                Ok(joined) => joined,
                Err(join_error) => {
                    fatal = Some(MicroflowError::Orchestration(format!(
                        "step task ended abnormally: {join_error}"
                    )));
                    break;
                }
            };

            match result {
                Ok(completion) => {
                    report.record(&completion);
                    for child_id in &completion.ready_children {
                        self.spawn_step(&mut tasks, &graph, *child_id, &run);
                    }
                }
                Err(error) if error.is_controlled_halt() => report.halted.push(step_id),
                Err(error) if error.is_branch_local() => {
                    debug!(run_id = %run.run_id, step_id = step_id, error = %error, "Branch ended");
                    report.failed.push(step_id);
                }
                Err(error) => {
                    fatal = Some(error);
                    break;
                }
            }
        }

        if let Some(error) = fatal {
            error!(run_id = %run.run_id, error = %error, "❌ Iteration aborted");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            self.cleanup_run(&run.run_id);
            return Err(error);
        }

        report.step_states = self.orchestrator.services().arena.snapshot(&run.run_id);
        self.cleanup_run(&run.run_id);

        info!(
            run_id = %run.run_id,
            executed = report.executed.len(),
            failed = report.failed.len(),
            halted = report.halted.len(),
            skipped = report.skipped.len(),
            "Iteration finished"
        );
        Ok(report)
    }

    fn spawn_step(
        &self,
        tasks: &mut JoinSet<(i32, Result<StepCompletion>)>,
        graph: &Arc<CompiledGraph>,
        step_id: i32,
        run: &RunObject,
    ) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let graph = Arc::clone(graph);
        let run = run.clone();
        tasks.spawn(async move {
            let result = orchestrator.execute_step(&graph, step_id, &run).await;
            (step_id, result)
        });
    }

    fn cleanup_run(&self, run_id: &str) {
        let services = self.orchestrator.services();
        let counters = services.counters.delete_run(run_id);
        let records = services.arena.clear_run(run_id);
        debug!(run_id = %run_id, counters = counters, records = records, "Run state cleaned up");
    }

    async fn log_orchestration(&self, run: &ProjectRun, phase: OrchestrationPhase, message: &str) {
        self.audit
            .log_orchestration(OrchestrationLogEntry {
                project_id: run.project_id.clone(),
                instance_id: run.instance_id.clone(),
                global_key: run.global_key.clone(),
                phase,
                message: message.to_string(),
                logged_at: Utc::now(),
            })
            .await;
    }

    async fn log_fatal(&self, run: &ProjectRun, run_id: &str, step_id: i32, error: &MicroflowError) {
        warn!(
            project_id = %run.project_id,
            run_id = %run_id,
            step_id = step_id,
            error = %error,
            "Run-level error"
        );
        self.audit
            .log_error(ErrorLogEntry {
                project_id: run.project_id.clone(),
                step_id,
                run_id: run_id.to_string(),
                message: error.to_string(),
                fatal: true,
                logged_at: Utc::now(),
            })
            .await;
    }
}
