// State machine module for step execution and run control
//
// Run-state values (ready/paused/stopped) shared by every control scope, and the per-step
// execution lifecycle tracked in an arena keyed by (run_id, step_id).

pub mod errors;
pub mod events;
pub mod states;
pub mod step_state_machine;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::StepEvent;
pub use states::{RunState, StepExecutionState};
pub use step_state_machine::{StepRecord, StepStateArena};
