//! Per-project graph ownership
//!
//! Each project's graph is an owned resource behind its own `RwLock`, kept
//! in a concurrent map keyed by project id. Writers for one project are
//! serialized by that lock; unrelated projects never contend.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::document::GraphDocument;
use super::repository::{GraphDocumentRepository, VersionToken};
use super::store::KnowledgeGraph;
use crate::config::GraphConfig;
use crate::error::{Error, Result};

/// Shared handle to one project's graph
pub type GraphHandle = Arc<RwLock<KnowledgeGraph>>;

/// Result of [`GraphRegistry::persist`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistOutcome {
    /// A new document version was written
    Written { token: VersionToken, attempts: u32 },
    /// Storage already holds this revision or a newer one
    UpToDate,
}

/// Concurrent map of project graphs backed by a document repository
pub struct GraphRegistry {
    graphs: DashMap<String, GraphHandle>,
    repository: Arc<dyn GraphDocumentRepository>,
    config: GraphConfig,
}

impl GraphRegistry {
    /// Create a registry over a repository
    pub fn new(repository: Arc<dyn GraphDocumentRepository>, config: GraphConfig) -> Self {
        Self {
            graphs: DashMap::new(),
            repository,
            config,
        }
    }

    /// The backing repository
    pub fn repository(&self) -> &Arc<dyn GraphDocumentRepository> {
        &self.repository
    }

    /// Graph settings applied to every loaded graph
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Handle for a project already in memory
    pub fn get(&self, project_id: &str) -> Option<GraphHandle> {
        self.graphs.get(project_id).map(|g| g.value().clone())
    }

    /// Ids of projects currently held in memory
    pub fn loaded_projects(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graphs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Handle for a project, hydrating it from storage on first use
    pub async fn load_or_create(&self, project_id: &str) -> Result<GraphHandle> {
        if let Some(handle) = self.get(project_id) {
            return Ok(handle);
        }

        let graph = match self.load_stored(project_id).await? {
            Some(graph) => graph,
            None => {
                debug!(project_id = %project_id, "Creating empty graph");
                KnowledgeGraph::new(project_id).with_config(&self.config)
            }
        };
        Ok(self.install(project_id, graph))
    }

    /// Handle for reading a project
    ///
    /// A project absent from memory and storage gets a detached empty graph
    /// that is not kept in the registry.
    pub async fn load_existing(&self, project_id: &str) -> Result<GraphHandle> {
        if let Some(handle) = self.get(project_id) {
            return Ok(handle);
        }

        match self.load_stored(project_id).await? {
            Some(graph) => Ok(self.install(project_id, graph)),
            None => Ok(Arc::new(RwLock::new(
                KnowledgeGraph::new(project_id).with_config(&self.config),
            ))),
        }
    }

    async fn load_stored(&self, project_id: &str) -> Result<Option<KnowledgeGraph>> {
        let Some(stored) = self.repository.load(project_id).await? else {
            return Ok(None);
        };
        let graph = KnowledgeGraph::from_serializable(stored.document)?;
        info!(
            project_id = %project_id,
            entities = graph.entity_count(),
            relationships = graph.relationship_count(),
            "Loaded graph from storage"
        );
        Ok(Some(graph.with_config(&self.config)))
    }

    fn install(&self, project_id: &str, graph: KnowledgeGraph) -> GraphHandle {
        // A concurrent loader may have won; keep whichever landed first
        self.graphs
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(graph)))
            .value()
            .clone()
    }

    /// Drop a project's in-memory graph; storage is untouched
    pub fn evict(&self, project_id: &str) -> bool {
        self.graphs.remove(project_id).is_some()
    }

    /// Snapshot a project's graph under a short read lock
    pub async fn snapshot(&self, project_id: &str) -> Result<GraphDocument> {
        let handle = self.load_existing(project_id).await?;
        let graph = handle.read().await;
        Ok(graph.to_serializable())
    }

    /// Write a project's graph to storage
    ///
    /// The graph is snapshotted under a read lock that is released before
    /// any I/O. A stale version token is retried with a fresh read up to
    /// `persist_retry_attempts` times, then surfaced as `Error::Conflict`.
    pub async fn persist(&self, project_id: &str) -> Result<PersistOutcome> {
        let handle = self.load_or_create(project_id).await?;
        let attempts = self.config.persist_retry_attempts.max(1);

        for attempt in 1..=attempts {
            let stored = self.repository.current_version(project_id).await?;
            let document = {
                let graph = handle.read().await;
                if let Some(token) = &stored {
                    if token.revision >= graph.revision() {
                        debug!(project_id = %project_id, revision = token.revision, "Storage already current");
                        return Ok(PersistOutcome::UpToDate);
                    }
                }
                graph.to_serializable()
            };

            match self.repository.save(&document, stored.as_ref()).await {
                Ok(token) => {
                    debug!(
                        project_id = %project_id,
                        version = token.version,
                        revision = token.revision,
                        "Persisted graph"
                    );
                    return Ok(PersistOutcome::Written {
                        token,
                        attempts: attempt,
                    });
                }
                Err(Error::Conflict(_)) => {
                    warn!(project_id = %project_id, attempt, "Graph write conflicted, retrying");
                    tokio::task::yield_now().await;
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::Conflict(project_id.to_string()))
    }
}
