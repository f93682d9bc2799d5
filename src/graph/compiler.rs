//! # Workflow Compiler
//!
//! Normalises a step list into a [`CompiledGraph`]:
//!
//! 1. a synthetic container step `-1` is added,
//! 2. every step's parent count is the number of distinct steps naming it as a child
//!    (default children and webhook routes alike), zero-parent steps hang off the root,
//! 3. every edge records its target's parent count as the join threshold,
//! 4. the whole graph is saved in one replace, so a half-written graph is never visible.
//!
//! The input is assumed to be acyclic. Duplicate ids inside one children list are collapsed
//! so a parent can never credit the same join twice.

use crate::constants::{ROOT_EDGE_PARENT_COUNT, ROOT_STEP_ID};
use crate::error::{GraphError, Result};
use crate::models::{
    ChildRef, CompiledGraph, CompiledRoute, CompiledStep, CompiledWebhook, HttpAction,
    HttpMethod, Step, StepAction,
};
use crate::storage::GraphStore;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct WorkflowCompiler {
    store: Arc<dyn GraphStore>,
}

impl std::fmt::Debug for WorkflowCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCompiler").finish_non_exhaustive()
    }
}

impl WorkflowCompiler {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Compile the steps and atomically replace the project's stored graph
    #[instrument(skip(self, steps), fields(step_count = steps.len()))]
    pub async fn compile(&self, project_id: &str, steps: &[Step]) -> Result<Arc<CompiledGraph>> {
        let graph = Self::build(project_id, steps)?;
        let root_fan_out = graph.root()?.children.len();

        let graph = self.store.save_compiled_graph(graph).await?;

        info!(
            project_id = %project_id,
            steps = graph.step_count(),
            root_fan_out = root_fan_out,
            "🧩 Workflow graph compiled"
        );
        Ok(graph)
    }

    /// Build the compiled graph without persisting it
    pub fn build(project_id: &str, steps: &[Step]) -> std::result::Result<CompiledGraph, GraphError> {
        let mut known = HashSet::with_capacity(steps.len());
        for step in steps {
            if step.step_id < 0 {
                return Err(GraphError::InvalidStepId(step.step_id));
            }
            if !known.insert(step.step_id) {
                return Err(GraphError::DuplicateStep(step.step_id));
            }
        }

        let mut parents: HashMap<i32, BTreeSet<i32>> = HashMap::new();
        for step in steps {
            for child in step.all_child_ids() {
                if !known.contains(&child) {
                    return Err(GraphError::UnknownChild {
                        parent: step.step_id,
                        child,
                    });
                }
                parents.entry(child).or_default().insert(step.step_id);
            }
        }

        let parent_count =
            |step_id: i32| parents.get(&step_id).map_or(0, |set| set.len() as u32);

        let edges = |children: &[i32]| -> Vec<ChildRef> {
            let mut seen = HashSet::with_capacity(children.len());
            children
                .iter()
                .copied()
                .filter(|child| seen.insert(*child))
                .map(|child_id| ChildRef {
                    child_id,
                    child_parent_count: parent_count(child_id),
                })
                .collect()
        };

        let mut compiled = BTreeMap::new();
        let mut root_children = Vec::new();

        for step in steps {
            let count = parent_count(step.step_id);
            if count == 0 {
                root_children.push(ChildRef {
                    child_id: step.step_id,
                    child_parent_count: ROOT_EDGE_PARENT_COUNT,
                });
            }

            let http = HttpAction {
                url: step.action_url.clone(),
                method: if step.is_idempotent_get {
                    HttpMethod::Get
                } else {
                    HttpMethod::Post
                },
                timeout_seconds: step.action_timeout_seconds,
            };
            let action = match &step.retry_policy {
                Some(retry) => StepAction::Retrying {
                    http,
                    retry: retry.clone(),
                },
                None => StepAction::Simple { http },
            };

            let webhook = step.webhook.as_ref().map(|spec| CompiledWebhook {
                webhook_key: spec.webhook_key.clone(),
                routes: spec
                    .action_routes
                    .iter()
                    .map(|route| CompiledRoute {
                        action: route.action.clone(),
                        children: edges(&route.children),
                    })
                    .collect(),
                stop_on_webhook_failure: spec.stop_on_webhook_failure,
                timeout_seconds: step.callback_timeout_seconds,
            });

            debug!(step_id = step.step_id, parent_count = count, "Compiled step");

            compiled.insert(
                step.step_id,
                CompiledStep {
                    step_id: step.step_id,
                    parent_count: count,
                    children: edges(&step.children),
                    action,
                    stop_on_failure: step.stop_on_failure,
                    scale_group_id: step.scale_group_id.clone(),
                    webhook,
                },
            );
        }

        compiled.insert(
            ROOT_STEP_ID,
            CompiledStep {
                step_id: ROOT_STEP_ID,
                parent_count: 0,
                children: root_children,
                action: StepAction::Container,
                stop_on_failure: false,
                scale_group_id: None,
                webhook: None,
            },
        );

        Ok(CompiledGraph {
            project_id: project_id.to_string(),
            steps: compiled,
        })
    }
}
