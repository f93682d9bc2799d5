//! # Step Model
//!
//! Design-time description of one node of a workflow DAG, as submitted by a workflow author.
//! Steps are immutable once compiled; a new definition replaces the compiled graph wholesale.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Exponential backoff retry policy for a step's remote action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub delay_seconds: u64,
    /// Number of retries after the initial attempt
    pub max_retries: u32,
    /// Upper bound for any single backoff delay
    pub max_delay_seconds: u64,
    /// Multiplier applied to the delay after each retry
    pub backoff_coefficient: f64,
    /// Overall deadline measured from the first attempt, 0 disables it
    pub timeout_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay_seconds: 5,
            max_retries: 2,
            max_delay_seconds: 120,
            backoff_coefficient: 1.0,
            timeout_seconds: 300,
        }
    }
}

/// Children to run instead of the step's defaults when a webhook signal names `action`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookActionRoute {
    pub action: String,
    pub children: Vec<i32>,
}

/// External approval gate awaited after the step's action succeeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSpec {
    /// Signal key, may contain `<RunId>`-style placeholders
    pub webhook_key: String,
    #[serde(default)]
    pub action_routes: Vec<WebhookActionRoute>,
    /// Halt the branch when the wait times out instead of continuing with default children
    #[serde(default = "default_true")]
    pub stop_on_webhook_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub step_id: i32,
    #[serde(default)]
    pub children: Vec<i32>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    pub action_url: String,
    #[serde(default)]
    pub is_idempotent_get: bool,
    #[serde(default = "default_true")]
    pub stop_on_failure: bool,
    #[serde(default)]
    pub scale_group_id: Option<String>,
    #[serde(default)]
    pub webhook: Option<WebhookSpec>,
    /// Per-attempt timeout, 0 uses the configured default
    #[serde(default)]
    pub action_timeout_seconds: u64,
    /// Webhook wait timeout, 0 uses the configured default
    #[serde(default)]
    pub callback_timeout_seconds: u64,
}

impl Step {
    pub fn new(step_id: i32, action_url: impl Into<String>) -> Self {
        Self {
            step_id,
            children: Vec::new(),
            retry_policy: None,
            action_url: action_url.into(),
            is_idempotent_get: false,
            stop_on_failure: true,
            scale_group_id: None,
            webhook: None,
            action_timeout_seconds: 0,
            callback_timeout_seconds: 0,
        }
    }

    pub fn with_children(mut self, children: Vec<i32>) -> Self {
        self.children = children;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_scale_group(mut self, scale_group_id: impl Into<String>) -> Self {
        self.scale_group_id = Some(scale_group_id.into());
        self
    }

    pub fn with_webhook(mut self, webhook: WebhookSpec) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn with_stop_on_failure(mut self, stop_on_failure: bool) -> Self {
        self.stop_on_failure = stop_on_failure;
        self
    }

    pub fn with_http_get(mut self) -> Self {
        self.is_idempotent_get = true;
        self
    }

    pub fn with_action_timeout(mut self, seconds: u64) -> Self {
        self.action_timeout_seconds = seconds;
        self
    }

    pub fn with_callback_timeout(mut self, seconds: u64) -> Self {
        self.callback_timeout_seconds = seconds;
        self
    }

    /// Every step id this step can hand control to, defaults first then webhook routes
    pub fn all_child_ids(&self) -> impl Iterator<Item = i32> + '_ {
        let routed = self
            .webhook
            .iter()
            .flat_map(|webhook| webhook.action_routes.iter())
            .flat_map(|route| route.children.iter().copied());
        self.children.iter().copied().chain(routed)
    }
}

impl WebhookSpec {
    pub fn new(webhook_key: impl Into<String>) -> Self {
        Self {
            webhook_key: webhook_key.into(),
            action_routes: Vec::new(),
            stop_on_webhook_failure: true,
        }
    }

    pub fn with_route(mut self, action: impl Into<String>, children: Vec<i32>) -> Self {
        self.action_routes.push(WebhookActionRoute {
            action: action.into(),
            children,
        });
        self
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.stop_on_webhook_failure = false;
        self
    }
}
