//! Extraction endpoints and job introspection

use std::sync::Arc;

use super::{Caller, LoregraphService};
use crate::domain::extraction::{
    ExtractionJob, ExtractorKind, JobCostSummary, JobFilter, JobStatus,
};
use crate::domain::scene::{Scene, SceneSource};
use crate::error::{Error, Result};

impl LoregraphService {
    /// Queue one scene for extraction
    pub async fn extract_scene(
        &self,
        caller: &Caller,
        scene: Scene,
        extractor: Option<ExtractorKind>,
    ) -> Result<ExtractionJob> {
        let project_id = self.authorize(caller).await?;
        self.manager.submit(project_id, scene, extractor).await
    }

    /// Queue one scene by id from the configured scene source
    pub async fn extract_scene_by_id(
        &self,
        caller: &Caller,
        scene_id: &str,
        extractor: Option<ExtractorKind>,
    ) -> Result<ExtractionJob> {
        let project_id = self.authorize(caller).await?;
        let scene = self.scenes.get_scene(project_id, scene_id).await?;
        self.manager.submit(project_id, scene, extractor).await
    }

    /// Queue every scene of the project from the configured scene source
    pub async fn extract_all(
        &self,
        caller: &Caller,
        extractor: Option<ExtractorKind>,
    ) -> Result<Vec<ExtractionJob>> {
        let scenes = Arc::clone(&self.scenes);
        self.extract_all_from(caller, scenes.as_ref(), extractor).await
    }

    /// Queue every scene of the project from `source`
    pub async fn extract_all_from(
        &self,
        caller: &Caller,
        source: &dyn SceneSource,
        extractor: Option<ExtractorKind>,
    ) -> Result<Vec<ExtractionJob>> {
        let project_id = self.authorize(caller).await?;
        self.manager.extract_all(project_id, source, extractor).await
    }

    /// Jobs for the caller's project, most recent first
    pub async fn list_jobs(
        &self,
        caller: &Caller,
        status: Option<JobStatus>,
        limit: Option<u32>,
    ) -> Result<Vec<ExtractionJob>> {
        let project_id = self.authorize(caller).await?;
        let mut filter = JobFilter::for_project(project_id);
        filter.status = status;
        filter.limit = limit;
        self.manager.list_jobs(&filter).await
    }

    /// One job of the caller's project
    ///
    /// Jobs belonging to other projects read as missing.
    pub async fn get_job(&self, caller: &Caller, job_id: &str) -> Result<ExtractionJob> {
        let project_id = self.authorize(caller).await?;
        let job = self.manager.get_job(job_id).await?;
        if job.project_id != project_id {
            return Err(Error::job_not_found(job_id));
        }
        Ok(job)
    }

    /// Request cancellation; `false` when the job had already finished
    pub async fn cancel_job(&self, caller: &Caller, job_id: &str) -> Result<bool> {
        self.get_job(caller, job_id).await?;
        self.manager.cancel(job_id).await
    }

    /// Block until a job reaches a terminal state
    pub async fn wait_for_job(&self, caller: &Caller, job_id: &str) -> Result<ExtractionJob> {
        self.get_job(caller, job_id).await?;
        self.manager.wait(job_id).await
    }

    /// Spend and volume totals over the project's jobs
    pub async fn cost_summary(&self, caller: &Caller) -> Result<JobCostSummary> {
        let project_id = self.authorize(caller).await?;
        self.manager.project_cost_summary(project_id).await
    }
}
