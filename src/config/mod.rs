//! # Microflow Configuration
//!
//! Engine settings grouped by concern. Every field has a default, so an empty or missing
//! configuration file yields a working single-process engine.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use microflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let poll = manager.config().orchestration.pause_poll_interval();
//! # let _ = poll;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration, mirrors `config/microflow.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MicroflowConfig {
    pub orchestration: OrchestrationConfig,
    pub scale_groups: ScaleGroupConfig,
    pub webhooks: WebhookConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// How often a paused branch re-reads run state when no change notification arrives
    pub pause_poll_interval_ms: u64,
    /// Per-attempt HTTP timeout when a step does not set one
    pub default_action_timeout_seconds: u64,
    /// Base URL used to build callback URLs handed to webhook steps
    pub base_url: Option<String>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            pause_poll_interval_ms: 1000,
            default_action_timeout_seconds: 100,
            base_url: None,
        }
    }
}

impl OrchestrationConfig {
    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }

    pub fn default_action_timeout(&self) -> Duration {
        Duration::from_secs(self.default_action_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScaleGroupConfig {
    pub poll_interval_ms: u64,
    /// Maximum applied to groups that were never configured
    pub default_max_instances: u32,
    /// Groups configured at startup
    pub groups: BTreeMap<String, u32>,
}

impl Default for ScaleGroupConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            default_max_instances: u32::MAX,
            groups: BTreeMap::new(),
        }
    }
}

impl ScaleGroupConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub default_timeout_seconds: u64,
    /// How long a signal nobody has waited for stays buffered
    pub buffered_signal_ttl_seconds: u64,
    pub max_buffered_signals: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 86_400,
            buffered_signal_ttl_seconds: 86_400,
            max_buffered_signals: 64,
        }
    }
}

impl WebhookConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn buffered_signal_ttl(&self) -> Duration {
        Duration::from_secs(self.buffered_signal_ttl_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl MicroflowConfig {
    /// Validate values that would stall or misconfigure the engine
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.orchestration.pause_poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestration.pause_poll_interval_ms",
                "0",
                "poll interval must be greater than 0",
            ));
        }

        if self.orchestration.default_action_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestration.default_action_timeout_seconds",
                "0",
                "action timeout must be greater than 0",
            ));
        }

        if let Some(base_url) = &self.orchestration.base_url {
            if base_url.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "orchestration.base_url",
                    "orchestration configuration",
                ));
            }
        }

        if self.scale_groups.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "scale_groups.poll_interval_ms",
                "0",
                "poll interval must be greater than 0",
            ));
        }

        if self.webhooks.default_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "webhooks.default_timeout_seconds",
                "0",
                "webhook timeout must be greater than 0",
            ));
        }

        if self.webhooks.max_buffered_signals == 0 {
            return Err(ConfigurationError::invalid_value(
                "webhooks.max_buffered_signals",
                "0",
                "at least one signal must be bufferable per key",
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "logging.level",
                "logging configuration",
            ));
        }

        Ok(())
    }
}
