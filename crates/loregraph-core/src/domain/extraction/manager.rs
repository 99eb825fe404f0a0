//! Extraction job manager
//!
//! Schedules extraction jobs as independent tokio tasks, bounded by a
//! semaphore. Each job runs its extractor without holding any lock, then
//! applies the output to the project graph under that project's write lock,
//! persists the graph, and publishes delta events.
//!
//! ## Job lifecycle
//!
//! 1. `submit` records a pending job and spawns its task
//! 2. The task waits for a concurrency permit, then marks the job running
//! 3. The extractor runs under the job timeout; cancellation interrupts it
//! 4. Under the write lock, cancellation is checked one last time and the
//!    whole batch is applied
//! 5. The graph is persisted and the job is marked completed
//!
//! Any error before step 4 commits marks the job failed and leaves the
//! graph untouched. After the commit, storage errors are logged and the
//! completion is still announced. Jobs are never retried automatically.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::extractor::Extractor;
use super::job::{ExtractionJob, ExtractorKind, JobStatus};
use super::repository::{JobCostSummary, JobFilter, JobRepository};
use crate::config::ExtractionConfig;
use crate::cost::CostLedger;
use crate::domain::events::{GraphEvent, UpdateChannel};
use crate::domain::graph::GraphRegistry;
use crate::domain::scene::{Scene, SceneSource};
use crate::error::{Error, Result};

/// In-flight job bookkeeping
struct TrackedJob {
    token: CancellationToken,
    status: watch::Receiver<JobStatus>,
}

/// Runs extraction jobs and applies their results
#[derive(Clone)]
pub struct JobManager {
    registry: Arc<GraphRegistry>,
    jobs: Arc<dyn JobRepository>,
    channel: Arc<UpdateChannel>,
    extractors: Arc<DashMap<ExtractorKind, Arc<dyn Extractor>>>,
    ledger: CostLedger,
    semaphore: Arc<Semaphore>,
    tracked: Arc<DashMap<String, TrackedJob>>,
    config: ExtractionConfig,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("extractors", &self.extractors.len())
            .field("active_jobs", &self.tracked.len())
            .field("max_concurrent_jobs", &self.config.max_concurrent_jobs)
            .finish()
    }
}

impl JobManager {
    pub fn new(
        registry: Arc<GraphRegistry>,
        jobs: Arc<dyn JobRepository>,
        channel: Arc<UpdateChannel>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            registry,
            jobs,
            channel,
            extractors: Arc::new(DashMap::new()),
            ledger: CostLedger::default(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            tracked: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Register an extractor for its kind
    pub fn with_extractor(self, extractor: Arc<dyn Extractor>) -> Self {
        self.register_extractor(extractor);
        self
    }

    /// Use a specific cost ledger
    pub fn with_ledger(mut self, ledger: CostLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Register or replace the extractor for its kind
    pub fn register_extractor(&self, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(extractor.kind(), extractor);
    }

    pub fn has_extractor(&self, kind: ExtractorKind) -> bool {
        self.extractors.contains_key(&kind)
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Ids of jobs submitted by this manager that have not finished
    pub fn active_jobs(&self) -> Vec<String> {
        self.tracked.iter().map(|e| e.key().clone()).collect()
    }

    // ========== Submission ==========

    /// Submit one scene for extraction
    ///
    /// Returns the pending job record; the job runs in the background.
    /// `extractor` defaults to the configured extractor.
    pub async fn submit(
        &self,
        project_id: &str,
        scene: Scene,
        extractor: Option<ExtractorKind>,
    ) -> Result<ExtractionJob> {
        let kind = extractor.unwrap_or(self.config.default_extractor);
        let extractor = self
            .extractors
            .get(&kind)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                Error::Validation(format!("no {} extractor is configured", kind.as_str()))
            })?;

        let job = ExtractionJob::new(project_id, &scene.id, kind);
        self.jobs.insert(&job).await?;

        let token = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(JobStatus::Pending);
        self.tracked.insert(
            job.id.clone(),
            TrackedJob {
                token: token.clone(),
                status: status_rx,
            },
        );

        info!(
            job_id = %job.id,
            project_id = %project_id,
            scene_id = %scene.id,
            extractor = %kind,
            "Submitted extraction job"
        );

        let manager = self.clone();
        let task_job = job.clone();
        tokio::spawn(async move {
            manager
                .run(task_job, scene.text, extractor, token, status_tx)
                .await;
        });

        Ok(job)
    }

    /// Submit every scene of a project
    ///
    /// Scenes that cannot be read produce a failed job; the rest still run.
    pub async fn extract_all(
        &self,
        project_id: &str,
        source: &dyn SceneSource,
        extractor: Option<ExtractorKind>,
    ) -> Result<Vec<ExtractionJob>> {
        let scene_ids = source.list_scenes(project_id).await?;
        info!(project_id = %project_id, scenes = scene_ids.len(), "Submitting batch extraction");

        let mut submitted = Vec::with_capacity(scene_ids.len());
        for scene_id in scene_ids {
            match source.get_scene(project_id, &scene_id).await {
                Ok(scene) => submitted.push(self.submit(project_id, scene, extractor).await?),
                Err(err) => {
                    warn!(project_id = %project_id, scene_id = %scene_id, error = %err, "Could not read scene");
                    let kind = extractor.unwrap_or(self.config.default_extractor);
                    let mut job = ExtractionJob::new(project_id, &scene_id, kind);
                    job.fail(format!("could not read scene: {}", err))?;
                    self.jobs.insert(&job).await?;
                    self.channel.publish(GraphEvent::job_failed(
                        project_id,
                        &job.id,
                        &scene_id,
                        err.to_string(),
                        false,
                    ));
                    submitted.push(job);
                }
            }
        }
        Ok(submitted)
    }

    // ========== Control ==========

    /// Request cancellation of a job
    ///
    /// Returns `true` if the job was still in flight. A job whose results
    /// were already committed completes normally.
    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        if let Some(token) = self.tracked.get(job_id).map(|t| t.token.clone()) {
            info!(job_id = %job_id, "Cancellation requested");
            token.cancel();
            return Ok(true);
        }
        match self.jobs.get(job_id).await? {
            Some(_) => Ok(false),
            None => Err(Error::job_not_found(job_id)),
        }
    }

    /// Cancel every in-flight job, e.g. on shutdown
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.tracked.iter() {
            entry.token.cancel();
            count += 1;
        }
        count
    }

    /// Wait until a job reaches a terminal state and return its record
    pub async fn wait(&self, job_id: &str) -> Result<ExtractionJob> {
        let receiver = self.tracked.get(job_id).map(|t| t.status.clone());
        if let Some(mut receiver) = receiver {
            // Err means the task ended; its last write is already stored
            let _ = receiver.wait_for(|s| s.is_terminal()).await;
        }
        self.get_job(job_id).await
    }

    /// Wait for several jobs
    pub async fn wait_all(&self, job_ids: &[String]) -> Result<Vec<ExtractionJob>> {
        let mut finished = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            finished.push(self.wait(job_id).await?);
        }
        Ok(finished)
    }

    // ========== Introspection ==========

    pub async fn get_job(&self, job_id: &str) -> Result<ExtractionJob> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ExtractionJob>> {
        self.jobs.list(filter).await
    }

    /// Cost totals from the job table, which outlives this process's ledger
    pub async fn project_cost_summary(&self, project_id: &str) -> Result<JobCostSummary> {
        self.jobs.project_cost_summary(project_id).await
    }

    // ========== Execution ==========

    async fn run(
        self,
        mut job: ExtractionJob,
        text: String,
        extractor: Arc<dyn Extractor>,
        token: CancellationToken,
        status: watch::Sender<JobStatus>,
    ) {
        if let Err(err) = self
            .drive(&mut job, &text, extractor.as_ref(), &token, &status)
            .await
        {
            self.record_failure(&mut job, err).await;
        }

        self.tracked.remove(&job.id);
        let _ = status.send(job.status);
    }

    async fn drive(
        &self,
        job: &mut ExtractionJob,
        text: &str,
        extractor: &dyn Extractor,
        token: &CancellationToken,
        status: &watch::Sender<JobStatus>,
    ) -> Result<()> {
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::JobCancelled(job.id.clone())),
            permit = self.semaphore.clone().acquire_owned() => permit
                .map_err(|_| Error::Other("extraction scheduler is closed".to_string()))?,
        };

        job.start()?;
        self.jobs.update(job).await?;
        let _ = status.send(job.status);
        self.channel.publish(GraphEvent::job_started(
            &job.project_id,
            &job.id,
            &job.scene_id,
            job.extractor,
        ));
        debug!(job_id = %job.id, "Extraction job running");

        let timeout_secs = self.config.job_timeout_secs;
        let output = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::JobCancelled(job.id.clone())),
            result = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                extractor.extract(text, &job.scene_id),
            ) => match result {
                Ok(output) => output?,
                Err(_) => return Err(Error::ExtractionTimeout(timeout_secs)),
            },
        };

        if let Some(usage) = &output.usage {
            let cost = self
                .ledger
                .record(&job.project_id, &job.id, &usage.model, usage.tokens);
            job.record_usage(usage.model.clone(), usage.tokens, cost.cost_usd);
        }
        let entities_found = output.entities.len() as u32;
        let relationships_found = output.relationships.len() as u32;

        // The write lock covers only the in-memory apply
        let handle = self.registry.load_or_create(&job.project_id).await?;
        let (applied, events) = {
            let mut graph = handle.write().await;
            if token.is_cancelled() {
                return Err(Error::JobCancelled(job.id.clone()));
            }
            let applied = graph.apply_batch(output.into_batch())?;

            let mut events = Vec::new();
            for id in &applied.created_entities {
                if let Some(entity) = graph.get_entity(id) {
                    events.push(GraphEvent::entity_added(&job.project_id, entity, Some(job.id.as_str())));
                }
            }
            for id in &applied.merged_entities {
                if let Some(entity) = graph.get_entity(id) {
                    events.push(GraphEvent::entity_updated(&job.project_id, entity));
                }
            }
            for id in &applied.relationships {
                if let Some(relationship) = graph.get_relationship(id) {
                    events.push(GraphEvent::relationship_added(
                        &job.project_id,
                        relationship,
                        Some(job.id.as_str()),
                    ));
                }
            }
            (applied, events)
        };

        for reason in &applied.skipped_relationships {
            debug!(job_id = %job.id, reason = %reason, "Skipped proposed relationship");
        }

        // Committed: from here the job completes even if persistence fails,
        // since the graph already holds its results
        if let Err(err) = self.registry.persist(&job.project_id).await {
            error!(
                job_id = %job.id,
                project_id = %job.project_id,
                error = %err,
                "Failed to persist graph after extraction"
            );
        }

        job.complete(entities_found, relationships_found)?;
        if let Err(err) = self.jobs.update(job).await {
            error!(
                job_id = %job.id,
                error = %err,
                "Failed to record job completion"
            );
        }

        self.channel.publish_all(events);
        self.channel.publish(GraphEvent::job_completed(
            &job.project_id,
            &job.id,
            &job.scene_id,
            &applied,
            job.cost,
        ));

        info!(
            job_id = %job.id,
            project_id = %job.project_id,
            created = applied.created_entities.len(),
            merged = applied.merged_entities.len(),
            relationships = applied.relationships.len(),
            cost = job.cost,
            duration_ms = job.duration_ms().unwrap_or(0),
            "Extraction job completed"
        );
        Ok(())
    }

    async fn record_failure(&self, job: &mut ExtractionJob, err: Error) {
        if job.status.is_terminal() {
            error!(job_id = %job.id, error = %err, "Error after job finished");
            return;
        }

        let cancelled = matches!(err, Error::JobCancelled(_));
        let transition = if cancelled {
            job.cancel()
        } else {
            job.fail(err.to_string())
        };
        if let Err(transition_err) = transition {
            error!(job_id = %job.id, error = %transition_err, "Invalid job transition");
            return;
        }

        if cancelled {
            info!(job_id = %job.id, "Extraction job cancelled");
        } else {
            warn!(job_id = %job.id, code = err.code(), error = %err, "Extraction job failed");
        }

        if let Err(update_err) = self.jobs.update(job).await {
            error!(job_id = %job.id, error = %update_err, "Failed to record job failure");
        }

        self.channel.publish(GraphEvent::job_failed(
            &job.project_id,
            &job.id,
            &job.scene_id,
            job.error_message.clone().unwrap_or_default(),
            cancelled,
        ));
    }
}
