//! # Graph
//!
//! Compilation of workflow step lists into runtime graphs.

pub mod compiler;

pub use compiler::WorkflowCompiler;
