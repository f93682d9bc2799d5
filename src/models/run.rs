//! # Run Model
//!
//! `ProjectRun` describes one start request of a project (instance id, global key and loop
//! count). Each loop iteration gets its own `RunObject` whose `run_id` scopes every
//! completion counter and step record of that iteration.

use crate::constants::ROOT_STEP_ID;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Start request for a compiled project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub project_id: String,
    /// Number of times the whole graph is executed, 0 is treated as 1
    #[serde(default)]
    pub loop_count: u32,
    #[serde(default)]
    pub global_key: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl RunRequest {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn with_global_key(mut self, global_key: impl Into<String>) -> Self {
        self.global_key = Some(global_key.into());
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }
}

/// Identity of one project execution across all of its loop iterations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRun {
    pub project_id: String,
    pub instance_id: String,
    pub global_key: String,
    pub loop_count: u32,
}

impl ProjectRun {
    /// Resolve defaults: a fresh instance id, a global key equal to the instance id, one loop
    pub fn from_request(request: &RunRequest) -> Self {
        let instance_id = request
            .instance_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let global_key = request
            .global_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| instance_id.clone());

        Self {
            project_id: request.project_id.clone(),
            instance_id,
            global_key,
            loop_count: request.loop_count.max(1),
        }
    }

    /// Run object for a 1-based loop iteration
    pub fn iteration(&self, loop_index: u32) -> RunObject {
        RunObject::new(
            self.project_id.clone(),
            format!("{}@{}", self.instance_id, loop_index),
            self.global_key.clone(),
            loop_index,
        )
    }
}

/// One iteration of a project run
///
/// Clones share the `current_step_id` progress marker, which records the step most recently
/// entered by any branch of the iteration.
#[derive(Debug, Clone)]
pub struct RunObject {
    pub project_id: String,
    pub run_id: String,
    pub global_key: String,
    pub loop_index: u32,
    current_step_id: Arc<AtomicI32>,
}

impl RunObject {
    pub fn new(
        project_id: impl Into<String>,
        run_id: impl Into<String>,
        global_key: impl Into<String>,
        loop_index: u32,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            run_id: run_id.into(),
            global_key: global_key.into(),
            loop_index,
            current_step_id: Arc::new(AtomicI32::new(ROOT_STEP_ID)),
        }
    }

    pub fn current_step_id(&self) -> i32 {
        self.current_step_id.load(Ordering::Acquire)
    }

    pub fn record_step(&self, step_id: i32) {
        self.current_step_id.store(step_id, Ordering::Release);
    }
}
