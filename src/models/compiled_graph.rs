//! # Compiled Graph
//!
//! Runtime form of a workflow: every step keyed by id with its fan-in degree and outgoing
//! edges. Each edge carries the target's join threshold so the orchestrator can decide a
//! join from the edge alone.

use crate::constants::ROOT_STEP_ID;
use crate::error::{GraphError, MicroflowError};
use crate::models::step::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// Edge to a child step with the child's join threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildRef {
    pub child_id: i32,
    pub child_parent_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpAction {
    pub url: String,
    pub method: HttpMethod,
    /// Per-attempt timeout, 0 means the configured default
    pub timeout_seconds: u64,
}

/// What a compiled step does when it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Synthetic root, fans out only
    Container,
    /// Single attempt, any failure is terminal
    Simple { http: HttpAction },
    /// Retried with exponential backoff
    Retrying { http: HttpAction, retry: RetryPolicy },
}

impl StepAction {
    pub fn http(&self) -> Option<&HttpAction> {
        match self {
            Self::Container => None,
            Self::Simple { http } | Self::Retrying { http, .. } => Some(http),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledRoute {
    pub action: String,
    pub children: Vec<ChildRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledWebhook {
    pub webhook_key: String,
    pub routes: Vec<CompiledRoute>,
    pub stop_on_webhook_failure: bool,
    /// Wait timeout, 0 means the configured default
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledStep {
    pub step_id: i32,
    /// Number of distinct steps listing this step as a child (root excluded)
    pub parent_count: u32,
    pub children: Vec<ChildRef>,
    pub action: StepAction,
    pub stop_on_failure: bool,
    pub scale_group_id: Option<String>,
    pub webhook: Option<CompiledWebhook>,
}

impl CompiledStep {
    pub fn is_root(&self) -> bool {
        self.step_id == ROOT_STEP_ID
    }

    /// Children to fan out to after a webhook signal carrying `action`
    ///
    /// No action, or an action without a route, selects the default children. An unmatched
    /// action is an error only when the step declares routes but has no default children.
    pub fn resolve_webhook_children(
        &self,
        action: Option<&str>,
    ) -> Result<Vec<ChildRef>, MicroflowError> {
        let Some(webhook) = &self.webhook else {
            return Ok(self.children.clone());
        };

        let action = match action.map(str::trim) {
            Some(action) if !action.is_empty() => action,
            _ => return Ok(self.children.clone()),
        };

        if let Some(route) = webhook
            .routes
            .iter()
            .find(|route| route.action.eq_ignore_ascii_case(action))
        {
            return Ok(route.children.clone());
        }

        if !webhook.routes.is_empty() && self.children.is_empty() {
            return Err(MicroflowError::WebhookResolution {
                step_id: self.step_id,
                action: action.to_string(),
            });
        }

        Ok(self.children.clone())
    }
}

/// Normalised, queryable workflow graph including the synthetic root `-1`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledGraph {
    pub project_id: String,
    pub steps: BTreeMap<i32, CompiledStep>,
}

impl CompiledGraph {
    pub fn step(&self, step_id: i32) -> Result<&CompiledStep, GraphError> {
        self.steps
            .get(&step_id)
            .ok_or_else(|| GraphError::MissingStep {
                project_id: self.project_id.clone(),
                step_id,
            })
    }

    pub fn root(&self) -> Result<&CompiledStep, GraphError> {
        self.step(ROOT_STEP_ID)
    }

    /// Real steps only, the synthetic root excluded
    pub fn step_count(&self) -> usize {
        self.steps.keys().filter(|id| **id != ROOT_STEP_ID).count()
    }

    pub fn parent_count(&self, step_id: i32) -> Option<u32> {
        self.steps.get(&step_id).map(|step| step.parent_count)
    }
}
