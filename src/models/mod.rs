//! # Models
//!
//! Design-time workflow definitions, the compiled runtime graph and run identities.

pub mod compiled_graph;
pub mod run;
pub mod step;
pub mod workflow;

pub use compiled_graph::{
    ChildRef, CompiledGraph, CompiledRoute, CompiledStep, CompiledWebhook, HttpAction,
    HttpMethod, StepAction,
};
pub use run::{ProjectRun, RunObject, RunRequest};
pub use step::{RetryPolicy, Step, WebhookActionRoute, WebhookSpec};
pub use workflow::{apply_merge_fields, WorkflowDefinition};
