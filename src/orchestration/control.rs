//! # Control Surface
//!
//! Parsing and dispatch for run-state commands, custom step lists and scale-group commands.

use crate::constants::control_keys;
use crate::coordination::{ConcurrencyGate, ScaleGroupStatus};
use crate::error::{MicroflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Ready,
    Pause,
    Stop,
    /// Read the current state without changing it
    Get,
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "{}", control_keys::READY),
            Self::Pause => write!(f, "{}", control_keys::PAUSE),
            Self::Stop => write!(f, "{}", control_keys::STOP),
            Self::Get => write!(f, "{}", control_keys::READ),
        }
    }
}

impl FromStr for ControlCommand {
    type Err = MicroflowError;

    fn from_str(s: &str) -> Result<Self> {
        let command = s.trim().to_lowercase();
        match command.as_str() {
            control_keys::READY | control_keys::RUN => Ok(Self::Ready),
            control_keys::PAUSE => Ok(Self::Pause),
            control_keys::STOP => Ok(Self::Stop),
            control_keys::READ => Ok(Self::Get),
            _ => Err(MicroflowError::InvalidControl(format!(
                "unknown control command '{s}'"
            ))),
        }
    }
}

/// Parse a comma separated step list such as `"1, 2,3"`
///
/// Empty entries are ignored; any other non-integer entry is rejected.
pub fn parse_step_list(raw: &str) -> Result<Vec<i32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry.parse::<i32>().map_err(|_| {
                MicroflowError::InvalidControl(format!("'{entry}' is not a step id"))
            })
        })
        .collect()
}

/// Apply a scale-group command and return the affected groups
///
/// With a target and a maximum the group's maximum is set first. Without a target every known
/// group is returned.
pub fn scale_group_command(
    gate: &ConcurrencyGate,
    scale_group_id: Option<&str>,
    max_instances: Option<u32>,
) -> Result<BTreeMap<String, ScaleGroupStatus>> {
    match (scale_group_id, max_instances) {
        (Some(id), Some(max)) => {
            gate.set_max(id, max);
            Ok(gate
                .status(id)
                .map(|status| (id.to_string(), status))
                .into_iter()
                .collect())
        }
        (Some(id), None) => Ok(gate
            .status(id)
            .map(|status| (id.to_string(), status))
            .into_iter()
            .collect()),
        (None, None) => Ok(gate.list_all()),
        (None, Some(_)) => Err(MicroflowError::InvalidControl(
            "a scale group id is required to set a maximum".to_string(),
        )),
    }
}
