//! # Action Invocation
//!
//! Transport seam for a step's remote HTTP action plus the request shape the orchestrator
//! sends: placeholder substitution in URLs and webhook keys, and the JSON body posted to
//! non-GET actions.

use crate::constants::placeholders;
use crate::models::HttpMethod;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Transport failures, retryable within a step's retry policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("non-success status code {status_code}")]
    NonSuccessStatus { status_code: u16 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionResponse {
    pub status_code: u16,
    pub body: Option<String>,
}

impl ActionResponse {
    pub fn ok() -> Self {
        Self {
            status_code: 200,
            body: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Performs a step's HTTP action
///
/// Implementations should return `NonSuccessStatus` for non-2xx responses; the orchestrator
/// also treats a returned non-2xx response as a failure.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn invoke(&self, request: ActionRequest) -> Result<ActionResponse, TransportError>;
}

/// JSON body posted to non-GET actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPostData {
    pub project_name: String,
    pub run_id: String,
    pub step_id: i32,
    pub global_key: String,
    pub loop_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// Values substituted for `<ProjectName>`-style tokens
#[derive(Debug, Clone, Copy)]
pub struct PlaceholderValues<'a> {
    pub project_name: &'a str,
    pub run_id: &'a str,
    pub step_id: i32,
    pub global_key: &'a str,
    pub webhook_key: Option<&'a str>,
    pub callback_url: Option<&'a str>,
}

/// Replace every known placeholder token in `template`
///
/// Webhook and callback tokens become empty when the step has no webhook.
pub fn render_placeholders(template: &str, values: &PlaceholderValues<'_>) -> String {
    if !template.contains('<') {
        return template.to_string();
    }

    template
        .replace(placeholders::PROJECT_NAME, values.project_name)
        .replace(placeholders::RUN_ID, values.run_id)
        .replace(placeholders::STEP_ID, &values.step_id.to_string())
        .replace(placeholders::GLOBAL_KEY, values.global_key)
        .replace(placeholders::WEBHOOK_KEY, values.webhook_key.unwrap_or_default())
        .replace(placeholders::CALLBACK_URL, values.callback_url.unwrap_or_default())
}
