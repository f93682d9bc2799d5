//! # Orchestration Core
//!
//! Single bootstrap path for the engine: builds the coordination services, compiler, step
//! orchestrator and run coordinator from one configuration and exposes the operations of the
//! control surface.

use crate::config::{ConfigManager, MicroflowConfig};
use crate::coordination::{
    CoordinationServices, RunStateScope, ScaleGroupStatus, SignalDelivery, WebhookSignal,
};
use crate::error::Result;
use crate::graph::WorkflowCompiler;
use crate::models::{CompiledGraph, RunRequest, WorkflowDefinition};
use crate::orchestration::action::ActionInvoker;
use crate::orchestration::control::{parse_step_list, scale_group_command, ControlCommand};
use crate::orchestration::project_manager::ProjectManager;
use crate::orchestration::step_orchestrator::{OrchestratorSettings, StepOrchestrator};
use crate::orchestration::workflow_coordinator::{RunReport, WorkflowCoordinator};
use crate::state_machine::RunState;
use crate::storage::{AuditLog, GraphStore};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub struct OrchestrationCore {
    services: CoordinationServices,
    project_manager: ProjectManager,
    coordinator: WorkflowCoordinator,
    graph_store: Arc<dyn GraphStore>,
}

impl fmt::Debug for OrchestrationCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestrationCore")
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

impl OrchestrationCore {
    pub fn new(
        config: &MicroflowConfig,
        invoker: Arc<dyn ActionInvoker>,
        graph_store: Arc<dyn GraphStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let services = CoordinationServices::new(config);
        let orchestrator = StepOrchestrator::new(
            services.clone(),
            invoker,
            audit.clone(),
            OrchestratorSettings::from_config(config),
        );
        let project_manager = ProjectManager::new(
            WorkflowCompiler::new(graph_store.clone()),
            services.run_states.clone(),
            audit.clone(),
        );
        let coordinator = WorkflowCoordinator::new(orchestrator, graph_store.clone(), audit);

        info!("✅ Orchestration core initialized");

        Self {
            services,
            project_manager,
            coordinator,
            graph_store,
        }
    }

    /// Bootstrap from a loaded configuration manager
    pub fn from_config_manager(
        manager: &ConfigManager,
        invoker: Arc<dyn ActionInvoker>,
        graph_store: Arc<dyn GraphStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        info!(environment = %manager.environment(), "Bootstrapping orchestration core");
        Self::new(manager.config(), invoker, graph_store, audit)
    }

    pub fn services(&self) -> &CoordinationServices {
        &self.services
    }

    pub fn coordinator(&self) -> &WorkflowCoordinator {
        &self.coordinator
    }

    pub async fn upsert_project(
        &self,
        definition: WorkflowDefinition,
        global_key: Option<&str>,
    ) -> Result<Arc<CompiledGraph>> {
        self.project_manager
            .upsert_project(definition, global_key)
            .await
    }

    pub async fn upsert_project_json(
        &self,
        raw: &str,
        global_key: Option<&str>,
    ) -> Result<Arc<CompiledGraph>> {
        self.project_manager
            .upsert_project_json(raw, global_key)
            .await
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<bool> {
        self.graph_store.delete_compiled_graph(project_id).await
    }

    pub async fn start_run(&self, request: RunRequest) -> Result<RunReport> {
        self.coordinator.start_run(request).await
    }

    pub fn signal_webhook(&self, webhook_key: &str, signal: WebhookSignal) -> SignalDelivery {
        self.services.webhooks.signal(webhook_key, signal)
    }

    /// `ready | run | pause | stop | get` against a project or global key
    pub fn control(&self, scope: RunStateScope, key: &str, command: &str) -> Result<RunState> {
        let command: ControlCommand = command.parse()?;
        Ok(self.services.run_states.apply_control(scope, key, command))
    }

    /// Restrict the steps of a global key to a comma separated list, empty clears the list
    pub fn set_step_flow(&self, global_key: &str, raw_steps: &str) -> Result<Vec<i32>> {
        let steps = parse_step_list(raw_steps)?;
        if steps.is_empty() {
            self.services.run_states.clear_allowed_steps(global_key);
        } else {
            self.services
                .run_states
                .set_allowed_steps(global_key, steps.iter().copied());
        }
        Ok(steps)
    }

    pub fn scale_group(
        &self,
        scale_group_id: Option<&str>,
        max_instances: Option<u32>,
    ) -> Result<BTreeMap<String, ScaleGroupStatus>> {
        scale_group_command(&self.services.gate, scale_group_id, max_instances)
    }

    /// Executions of a step currently in progress across all runs of the project
    pub fn steps_in_progress(&self, project_id: &str, step_id: i32) -> u32 {
        self.services.activity.in_progress(project_id, step_id)
    }
}
