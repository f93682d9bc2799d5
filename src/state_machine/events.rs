use serde::{Deserialize, Serialize};
use std::fmt;

/// Events driving a step through its execution lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEvent {
    /// Gate check passed (and scale-group slot acquired)
    Admit,
    /// Remote action invocation started
    Start,
    /// Action (and webhook, if any) succeeded
    Succeed,
    /// Action or webhook failed terminally
    Fail,
    /// Children credited on their completion counters
    Propagate,
    /// Stop observed
    Halt,
    /// Step not enabled by the custom step list
    Skip,
}

impl fmt::Display for StepEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Admit => "admit",
            Self::Start => "start",
            Self::Succeed => "succeed",
            Self::Fail => "fail",
            Self::Propagate => "propagate",
            Self::Halt => "halt",
            Self::Skip => "skip",
        };
        write!(f, "{name}")
    }
}
