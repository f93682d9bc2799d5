use super::states::StepExecutionState;
use thiserror::Error;

/// Errors raised by the step execution state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid transition for step {step_id} in run {run_id}: {from} --{event}--> ?")]
    InvalidTransition {
        run_id: String,
        step_id: i32,
        from: StepExecutionState,
        event: String,
    },

    #[error("Step {step_id} has no execution record in run {run_id}")]
    UnknownStep { run_id: String, step_id: i32 },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
