//! # Graph Store
//!
//! Persistence seam for compiled graphs. Saving replaces the whole graph of a project in a
//! single operation; readers either see the previous graph or the new one.

use crate::error::{GraphError, Result};
use crate::models::CompiledGraph;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Load the compiled graph of a project
    async fn load_compiled_graph(&self, project_id: &str) -> Result<Arc<CompiledGraph>>;

    /// Atomically replace the compiled graph of `graph.project_id`
    async fn save_compiled_graph(&self, graph: CompiledGraph) -> Result<Arc<CompiledGraph>>;

    /// Remove a project's graph, returns whether one existed
    async fn delete_compiled_graph(&self, project_id: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct StoredGraph {
    graph: Arc<CompiledGraph>,
    saved_at: DateTime<Utc>,
}

/// Process-local graph store
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    graphs: DashMap<String, StoredGraph>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved_at(&self, project_id: &str) -> Option<DateTime<Utc>> {
        self.graphs.get(project_id).map(|stored| stored.saved_at)
    }

    pub fn project_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graphs.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn load_compiled_graph(&self, project_id: &str) -> Result<Arc<CompiledGraph>> {
        self.graphs
            .get(project_id)
            .map(|stored| stored.graph.clone())
            .ok_or_else(|| GraphError::NotCompiled(project_id.to_string()).into())
    }

    async fn save_compiled_graph(&self, graph: CompiledGraph) -> Result<Arc<CompiledGraph>> {
        let graph = Arc::new(graph);
        let project_id = graph.project_id.clone();
        self.graphs.insert(
            project_id.clone(),
            StoredGraph {
                graph: graph.clone(),
                saved_at: Utc::now(),
            },
        );
        debug!(project_id = %project_id, "Compiled graph stored");
        Ok(graph)
    }

    async fn delete_compiled_graph(&self, project_id: &str) -> Result<bool> {
        Ok(self.graphs.remove(project_id).is_some())
    }
}
