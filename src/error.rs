//! # Error Types
//!
//! Crate-level error taxonomy. Branch-local errors (`ActionExhaustedRetries`,
//! `WebhookResolution`, `WebhookTimeout`, `RunAborted`) end a single DAG branch and are
//! recorded in the run report; everything else is fatal to the run.

use crate::config::ConfigurationError;
use crate::orchestration::action::TransportError;
use crate::state_machine::errors::StateMachineError;
use thiserror::Error;

/// Errors raised while compiling or resolving a workflow graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Step {parent} references unknown child step {child}")]
    UnknownChild { parent: i32, child: i32 },

    #[error("Step id {0} is declared more than once")]
    DuplicateStep(i32),

    #[error("Step id {0} is invalid: step ids must be >= 0")]
    InvalidStepId(i32),

    #[error("Step {step_id} is missing from the compiled graph of project '{project_id}'")]
    MissingStep { project_id: String, step_id: i32 },

    #[error("Project '{0}' has no compiled graph")]
    NotCompiled(String),
}

#[derive(Debug, Error)]
pub enum MicroflowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Run {run_id} aborted at step {step_id}: stop observed")]
    RunAborted { run_id: String, step_id: i32 },

    #[error("Webhook action '{action}' for step {step_id} matches no mapping and the step has no default children")]
    WebhookResolution { step_id: i32, action: String },

    #[error("Webhook '{webhook_key}' for step {step_id} timed out after {timeout_seconds}s")]
    WebhookTimeout {
        step_id: i32,
        webhook_key: String,
        timeout_seconds: u64,
    },

    #[error("Step {step_id} failed after {attempts} attempt(s): {last_error}")]
    ActionExhaustedRetries {
        step_id: i32,
        attempts: u32,
        last_error: TransportError,
    },

    #[error("Project '{project_id}' is locked: project and global state must be ready")]
    ProjectLocked { project_id: String },

    #[error("Instance '{instance_id}' is already running")]
    InstanceActive { instance_id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Invalid control input: {0}")]
    InvalidControl(String),

    #[error("Orchestration error: {0}")]
    Orchestration(String),
}

impl MicroflowError {
    /// Errors that terminate one branch without cancelling its siblings
    pub fn is_branch_local(&self) -> bool {
        matches!(
            self,
            Self::RunAborted { .. }
                | Self::WebhookResolution { .. }
                | Self::WebhookTimeout { .. }
                | Self::ActionExhaustedRetries { .. }
        )
    }

    /// A stop was observed; this is a controlled halt rather than a failure
    pub fn is_controlled_halt(&self) -> bool {
        matches!(self, Self::RunAborted { .. })
    }

    /// Step the error is attributed to, when it has one
    pub fn step_id(&self) -> Option<i32> {
        match self {
            Self::RunAborted { step_id, .. }
            | Self::WebhookResolution { step_id, .. }
            | Self::WebhookTimeout { step_id, .. }
            | Self::ActionExhaustedRetries { step_id, .. } => Some(*step_id),
            Self::Graph(GraphError::MissingStep { step_id, .. }) => Some(*step_id),
            Self::Graph(GraphError::UnknownChild { parent, .. }) => Some(*parent),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MicroflowError>;
