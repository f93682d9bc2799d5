#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Microflow Core Rust
//!
//! DAG execution engine for workflows of remote HTTP actions.
//!
//! ## Overview
//!
//! A workflow is a directed acyclic graph of steps. Each step calls an external action, with
//! an optional retry policy, and then fans out to its children. A child that has several
//! parents runs exactly once, after the last of them completes. Steps can share cross-workflow
//! concurrency caps ("scale groups"), can suspend on external webhooks that choose the next
//! children, and obey ready/paused/stopped control at project and global scope.
//!
//! ## Module Organization
//!
//! - [`graph`] - Compiles step lists into graphs with fan-in degrees and a synthetic root
//! - [`orchestration`] - Step execution, the run driver and the control surface
//! - [`coordination`] - Completion counters, scale groups, run state and webhook mailboxes
//! - [`models`] - Workflow definitions, compiled graphs and run identities
//! - [`state_machine`] - Run states and the per-step execution lifecycle
//! - [`storage`] - Graph persistence and audit log seams
//! - [`config`] - Configuration loading
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use microflow_core::config::MicroflowConfig;
//! use microflow_core::models::{RunRequest, Step, WorkflowDefinition};
//! use microflow_core::orchestration::OrchestrationCore;
//! use microflow_core::storage::{InMemoryGraphStore, TracingAuditLog};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     invoker: Arc<dyn microflow_core::orchestration::ActionInvoker>,
//! # ) -> microflow_core::Result<()> {
//! let core = OrchestrationCore::new(
//!     &MicroflowConfig::default(),
//!     invoker,
//!     Arc::new(InMemoryGraphStore::new()),
//!     Arc::new(TracingAuditLog),
//! );
//!
//! let definition = WorkflowDefinition::new(
//!     "orders",
//!     vec![
//!         Step::new(1, "http://svc/validate").with_children(vec![2]),
//!         Step::new(2, "http://svc/ship"),
//!     ],
//! );
//! core.upsert_project(definition, None).await?;
//!
//! let report = core.start_run(RunRequest::new("orders")).await?;
//! println!("run {} finished: {}", report.instance_id, report.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod coordination;
pub mod error;
pub mod graph;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod storage;

pub use config::{ConfigManager, MicroflowConfig};
pub use constants::{NO_STEP_ID, ROOT_STEP_ID};
pub use coordination::{
    CompletionCounterStore, ConcurrencyGate, CoordinationServices, RunStateScope, RunStateStore,
    WebhookGate, WebhookSignal,
};
pub use error::{GraphError, MicroflowError, Result};
pub use graph::WorkflowCompiler;
pub use models::{CompiledGraph, RunRequest, Step, WorkflowDefinition};
pub use orchestration::{
    ActionInvoker, OrchestrationCore, RunReport, RunStatus, StepOrchestrator, WorkflowCoordinator,
};
pub use state_machine::{RunState, StepExecutionState};
