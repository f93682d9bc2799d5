//! # Orchestration Engine
//!
//! Runs compiled workflows.
//!
//! ## Core Components
//!
//! - **OrchestrationCore**: bootstrap and control surface
//! - **ProjectManager**: pause, compile and replace a project's graph
//! - **WorkflowCoordinator**: run identity, loop iterations and the per-iteration task driver
//! - **StepOrchestrator**: one step's gate check, admission, retries, webhook wait and fan-out
//! - **ActionInvoker**: transport seam for step actions

pub mod action;
pub mod backoff_calculator;
pub mod control;
pub mod core;
pub mod project_manager;
pub mod step_orchestrator;
pub mod workflow_coordinator;

pub use action::{
    ActionInvoker, ActionPostData, ActionRequest, ActionResponse, PlaceholderValues,
    TransportError,
};
pub use control::{parse_step_list, scale_group_command, ControlCommand};
pub use self::core::OrchestrationCore;
pub use project_manager::ProjectManager;
pub use step_orchestrator::{OrchestratorSettings, StepCompletion, StepOrchestrator};
pub use workflow_coordinator::{IterationReport, RunReport, RunStatus, WorkflowCoordinator};
