//! # System Constants
//!
//! Identifiers, control keywords and URL placeholder tokens shared across the
//! compiler, the orchestrator and the control surface.

// Re-export state types for convenience
pub use crate::state_machine::{RunState, StepExecutionState};

/// Id of the synthetic container step that parents every zero-parent step
pub const ROOT_STEP_ID: i32 = -1;

/// Join threshold recorded on edges leaving the synthetic root
pub const ROOT_EDGE_PARENT_COUNT: u32 = 1;

/// Step number recorded in error logs when a run fails before any step ran
pub const NO_STEP_ID: i32 = -2;

/// Control-surface keywords accepted for run-state commands
pub mod control_keys {
    pub const READY: &str = "ready";
    /// Accepted as an alias for `ready`
    pub const RUN: &str = "run";
    pub const PAUSE: &str = "pause";
    pub const STOP: &str = "stop";
    pub const READ: &str = "get";
}

/// Tokens substituted into action URLs and webhook keys before a step is invoked
pub mod placeholders {
    pub const PROJECT_NAME: &str = "<ProjectName>";
    pub const RUN_ID: &str = "<RunId>";
    pub const STEP_ID: &str = "<StepId>";
    pub const GLOBAL_KEY: &str = "<GlobalKey>";
    pub const WEBHOOK_KEY: &str = "<WebhookKey>";
    pub const CALLBACK_URL: &str = "<CallbackUrl>";
}

/// System-level identifiers
pub mod system {
    pub const MICROFLOW_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
    pub const WEBHOOK_ROUTE: &str = "webhooks";
    pub const CONFIG_FILE_STEM: &str = "microflow";
    pub const ENV_PREFIX: &str = "MICROFLOW";
}
