//! Service API
//!
//! [`LoregraphService`] is the surface other subsystems talk to. It wires the
//! graph registry, job manager, update channel and repositories together and
//! gates every call through a [`ProjectAccess`] check for the calling
//! identity.
//!
//! Operations are grouped by concern:
//!
//! - `graph`: paged listing, entity detail, paths, analytics, mutations
//! - `jobs`: extraction submission, job introspection, cancellation
//! - `export`: interchange JSON, narrative markdown, raw documents

pub mod export;
pub mod graph;
pub mod jobs;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::Config;
use crate::cost::{CostLedger, PricingTable};
use crate::domain::events::{GraphEvent, Subscription, UpdateChannel};
use crate::domain::extraction::{JobManager, JobRepository, LlmExtractor, NerExtractor};
use crate::domain::graph::{GraphDocumentRepository, GraphRegistry};
use crate::domain::scene::{InMemorySceneSource, SceneSource};
use crate::error::{Error, Result};
use crate::infrastructure::{SqliteGraphDocumentRepository, SqliteJobRepository};
use crate::llm::CompletionService;

pub use export::{
    ExportFormat, InterchangeGraph, InterchangeLink, InterchangeNode, import_interchange,
    to_interchange, to_narrative_markdown,
};
pub use graph::{EntityDetail, PathView};

/// Identity making a call, as vouched for by the auth subsystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    /// Project the caller is acting on
    pub project_id: String,
}

impl Caller {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
        }
    }

    /// Caller used by the command line, which runs with the user's own rights
    pub fn local(project_id: impl Into<String>) -> Self {
        Self::new("local", project_id)
    }
}

/// Decides whether a caller may touch a project
#[async_trait]
pub trait ProjectAccess: Send + Sync {
    /// `Ok(())` to allow, `Err(Error::Forbidden)` to reject
    async fn authorize(&self, caller: &Caller, project_id: &str) -> Result<()>;
}

/// Lets every caller into every project
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl ProjectAccess for AllowAll {
    async fn authorize(&self, _caller: &Caller, _project_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Explicit caller-to-project grants
#[derive(Debug, Clone, Default)]
pub struct ProjectMembers {
    grants: HashMap<String, HashSet<String>>,
}

impl ProjectMembers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, caller_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        self.grants
            .entry(caller_id.into())
            .or_default()
            .insert(project_id.into());
        self
    }
}

#[async_trait]
impl ProjectAccess for ProjectMembers {
    async fn authorize(&self, caller: &Caller, project_id: &str) -> Result<()> {
        let allowed = self
            .grants
            .get(&caller.id)
            .is_some_and(|projects| projects.contains(project_id));
        if allowed {
            Ok(())
        } else {
            Err(Error::Forbidden(caller.id.clone(), project_id.to_string()))
        }
    }
}

/// Entry point for queries, mutations and extraction
#[derive(Clone)]
pub struct LoregraphService {
    registry: Arc<GraphRegistry>,
    manager: JobManager,
    channel: Arc<UpdateChannel>,
    scenes: Arc<dyn SceneSource>,
    access: Arc<dyn ProjectAccess>,
}

impl std::fmt::Debug for LoregraphService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoregraphService")
            .field("loaded_projects", &self.registry.loaded_projects())
            .field("manager", &self.manager)
            .finish()
    }
}

impl LoregraphService {
    /// Assemble a service from its parts
    pub fn new(registry: Arc<GraphRegistry>, manager: JobManager, channel: Arc<UpdateChannel>) -> Self {
        Self {
            registry,
            manager,
            channel,
            scenes: Arc::new(InMemorySceneSource::new()),
            access: Arc::new(AllowAll),
        }
    }

    /// Build the whole stack over a migrated SQLite pool
    ///
    /// The local extractor is always registered; the model-backed one only
    /// when a completion service is supplied.
    pub fn from_pool(
        pool: SqlitePool,
        config: &Config,
        completion: Option<Arc<dyn CompletionService>>,
    ) -> Result<Self> {
        let documents: Arc<dyn GraphDocumentRepository> =
            Arc::new(SqliteGraphDocumentRepository::new(pool.clone()));
        let jobs: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool));
        Self::from_repositories(documents, jobs, config, completion)
    }

    /// Build the whole stack over arbitrary repositories
    pub fn from_repositories(
        documents: Arc<dyn GraphDocumentRepository>,
        jobs: Arc<dyn JobRepository>,
        config: &Config,
        completion: Option<Arc<dyn CompletionService>>,
    ) -> Result<Self> {
        let registry = Arc::new(GraphRegistry::new(documents, config.graph.clone()));
        let channel = Arc::new(UpdateChannel::new(config.realtime.channel_capacity));
        let manager = JobManager::new(
            registry.clone(),
            jobs,
            channel.clone(),
            config.extraction.clone(),
        )
        .with_ledger(CostLedger::new(PricingTable::default()))
        .with_extractor(Arc::new(NerExtractor::new()?));

        if let Some(service) = completion {
            let extractor = LlmExtractor::new(service)
                .with_config(&config.extraction)
                .with_model(config.llm.default_model.clone());
            manager.register_extractor(Arc::new(extractor));
        }

        Ok(Self::new(registry, manager, channel))
    }

    /// Read scenes for batch extraction from `scenes`
    pub fn with_scene_source(mut self, scenes: Arc<dyn SceneSource>) -> Self {
        self.scenes = scenes;
        self
    }

    /// Gate calls through `access`
    pub fn with_access(mut self, access: Arc<dyn ProjectAccess>) -> Self {
        self.access = access;
        self
    }

    pub fn registry(&self) -> &Arc<GraphRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    pub fn channel(&self) -> &Arc<UpdateChannel> {
        &self.channel
    }

    pub fn scenes(&self) -> &Arc<dyn SceneSource> {
        &self.scenes
    }

    /// Subscribe to a project's delta events
    pub async fn subscribe(&self, caller: &Caller) -> Result<Subscription> {
        let project_id = self.authorize(caller).await?;
        Ok(self.channel.subscribe(project_id))
    }

    /// Check the caller against its own project and return that project id
    async fn authorize<'a>(&self, caller: &'a Caller) -> Result<&'a str> {
        if caller.project_id.trim().is_empty() {
            return Err(Error::Validation("project id must not be empty".to_string()));
        }
        if let Err(err) = self.access.authorize(caller, &caller.project_id).await {
            warn!(caller = %caller.id, project_id = %caller.project_id, "Access denied");
            return Err(err);
        }
        Ok(&caller.project_id)
    }

    /// Persist a project's graph, then announce what changed
    ///
    /// Subscribers hear about the change even when the write fails; the
    /// in-memory graph already holds it.
    async fn commit(&self, project_id: &str, events: Vec<GraphEvent>) -> Result<()> {
        let persisted = self.registry.persist(project_id).await;
        let delivered = self.channel.publish_all(events);
        debug!(project_id = %project_id, delivered, "Committed graph change");
        persisted.map(|_| ())
    }
}
