//! # Storage and Audit Seams
//!
//! Traits for the collaborators the engine relies on but does not own: compiled-graph
//! persistence and the audit log. In-memory implementations back tests and single-process
//! deployments.

pub mod audit;
pub mod graph_store;

pub use audit::{
    AuditLog, ErrorLogEntry, InMemoryAuditLog, OrchestrationLogEntry, OrchestrationPhase,
    StepLogEntry, StepOutcome, TracingAuditLog,
};
pub use graph_store::{GraphStore, InMemoryGraphStore};
