//! # Workflow Definition
//!
//! A project's submitted workflow: its steps plus merge fields that are substituted into the
//! raw definition before it is parsed for compilation.

use crate::error::Result;
use crate::models::step::Step;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_loop_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub project_name: String,
    pub steps: Vec<Step>,
    /// `{name}` tokens in the raw definition are replaced by these values
    #[serde(default)]
    pub merge_fields: BTreeMap<String, String>,
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
}

impl WorkflowDefinition {
    pub fn new(project_name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            project_name: project_name.into(),
            steps,
            merge_fields: BTreeMap::new(),
            loop_count: 1,
        }
    }

    /// Parse a raw JSON definition, applying its merge fields to the raw text first
    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: WorkflowDefinition = serde_json::from_str(raw)?;
        if parsed.merge_fields.is_empty() {
            return Ok(parsed);
        }

        let merged = apply_merge_fields(raw, &parsed.merge_fields);
        Ok(serde_json::from_str(&merged)?)
    }

    /// Apply merge fields to an already parsed definition
    pub fn with_merge_fields_applied(self) -> Result<Self> {
        if self.merge_fields.is_empty() {
            return Ok(self);
        }
        let raw = serde_json::to_string(&self)?;
        Self::from_json(&raw)
    }
}

/// Replace every `{name}` token in `template` with its merge-field value
pub fn apply_merge_fields(template: &str, fields: &BTreeMap<String, String>) -> String {
    fields.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}
