//! # Project Manager
//!
//! Replaces a project's compiled graph. Compilation must not race a live run, so the project is
//! paused for the duration of the upsert and set back to ready afterwards, also on failure.

use crate::constants::NO_STEP_ID;
use crate::coordination::{RunStateScope, RunStateStore};
use crate::error::{MicroflowError, Result};
use crate::graph::WorkflowCompiler;
use crate::models::{CompiledGraph, WorkflowDefinition};
use crate::state_machine::RunState;
use crate::storage::{AuditLog, ErrorLogEntry};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct ProjectManager {
    compiler: WorkflowCompiler,
    run_states: Arc<RunStateStore>,
    audit: Arc<dyn AuditLog>,
}

impl fmt::Debug for ProjectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectManager")
            .field("compiler", &self.compiler)
            .finish_non_exhaustive()
    }
}

impl ProjectManager {
    pub fn new(
        compiler: WorkflowCompiler,
        run_states: Arc<RunStateStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            compiler,
            run_states,
            audit,
        }
    }

    /// Compile and store `definition`, replacing any previous graph of the project
    ///
    /// Rejected with `ProjectLocked` unless the project and, when given, the global key are
    /// both ready.
    #[instrument(skip(self, definition), fields(project_id = %definition.project_name))]
    pub async fn upsert_project(
        &self,
        definition: WorkflowDefinition,
        global_key: Option<&str>,
    ) -> Result<Arc<CompiledGraph>> {
        let project_id = definition.project_name.clone();

        let project_state = self.run_states.get(RunStateScope::Project, &project_id);
        let global_state = global_key.map_or(RunState::Ready, |key| {
            self.run_states.get(RunStateScope::Global, key)
        });
        if project_state != RunState::Ready || global_state != RunState::Ready {
            warn!(
                project_id = %project_id,
                project_state = %project_state,
                global_state = %global_state,
                "🔒 Project upsert rejected, project is not ready"
            );
            return Err(MicroflowError::ProjectLocked { project_id });
        }

        self.run_states.set_paused(RunStateScope::Project, &project_id);
        let result = self.compile_definition(&project_id, definition).await;
        self.run_states.set_ready(RunStateScope::Project, &project_id);

        match &result {
            Ok(graph) => info!(
                project_id = %project_id,
                step_count = graph.step_count(),
                "📦 Project upserted"
            ),
            Err(error) => {
                self.audit
                    .log_error(ErrorLogEntry {
                        project_id: project_id.clone(),
                        step_id: error.step_id().unwrap_or(NO_STEP_ID),
                        run_id: String::new(),
                        message: error.to_string(),
                        fatal: true,
                        logged_at: Utc::now(),
                    })
                    .await;
            }
        }

        result
    }

    /// Parse a raw JSON definition, apply its merge fields and upsert it
    pub async fn upsert_project_json(
        &self,
        raw: &str,
        global_key: Option<&str>,
    ) -> Result<Arc<CompiledGraph>> {
        let definition = WorkflowDefinition::from_json(raw)?;
        self.upsert_project(definition, global_key).await
    }

    async fn compile_definition(
        &self,
        project_id: &str,
        definition: WorkflowDefinition,
    ) -> Result<Arc<CompiledGraph>> {
        let definition = definition.with_merge_fields_applied()?;
        self.compiler.compile(project_id, &definition.steps).await
    }
}
