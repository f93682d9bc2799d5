use serde::{Deserialize, Serialize};
use std::fmt;

/// Control state of a project or global key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunState {
    /// Steps may execute
    #[default]
    Ready = 0,
    /// Steps wait at their gate check until the state changes
    Paused = 1,
    /// Branches reading this state halt without fanning out
    Stopped = 2,
}

impl RunState {
    /// Combine two scope states, the most restrictive one wins
    pub fn most_restrictive(self, other: RunState) -> RunState {
        if self as u8 >= other as u8 {
            self
        } else {
            other
        }
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl From<u8> for RunState {
    fn from(value: u8) -> Self {
        match value {
            0 => RunState::Ready,
            1 => RunState::Paused,
            _ => RunState::Stopped,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(Self::Ready),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Invalid run state: {s}")),
        }
    }
}

/// Lifecycle of one step execution within one run iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionState {
    /// Scheduled, gate check not yet passed
    #[default]
    Pending,
    /// Gate check passed and scale-group slot (if any) held
    Admitted,
    /// Remote action in flight or backing off between attempts
    Executing,
    /// Action succeeded (webhook wait, if any, follows)
    Succeeded,
    /// Action or webhook failed terminally
    Failed,
    /// Children have been credited on their completion counters
    Propagated,
    /// Stop observed, the branch unwound without fan-out
    Halted,
    /// Step excluded by the custom step list, the branch ends without fan-out
    Skipped,
}

impl StepExecutionState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Propagated | Self::Halted)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Admitted | Self::Executing)
    }
}

impl fmt::Display for StepExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Admitted => write!(f, "admitted"),
            Self::Executing => write!(f, "executing"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Propagated => write!(f, "propagated"),
            Self::Halted => write!(f, "halted"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}
