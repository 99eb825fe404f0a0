//! Repository trait for extraction job records
//!
//! Jobs are appended once and updated in place as they move through their
//! state machine. Records are kept for audit and cost reporting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::job::{ExtractionJob, JobStatus};
use crate::error::Result;

/// Filter for job listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub project_id: Option<String>,
    pub status: Option<JobStatus>,
    /// Most recent first; `None` for no limit
    pub limit: Option<u32>,
}

impl JobFilter {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &ExtractionJob) -> bool {
        self.project_id.as_ref().is_none_or(|p| *p == job.project_id)
            && self.status.is_none_or(|s| s == job.status)
    }
}

/// Spend and volume totals over a project's jobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobCostSummary {
    pub project_id: String,
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub total_cost: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

/// Repository trait for extraction jobs
#[async_trait]
pub trait JobRepository: Send + Sync {
    // ========== Job CRUD ==========

    /// Insert a new job record
    async fn insert(&self, job: &ExtractionJob) -> Result<()>;

    /// Overwrite a job record with its current state
    async fn update(&self, job: &ExtractionJob) -> Result<()>;

    /// Get a job by id
    async fn get(&self, job_id: &str) -> Result<Option<ExtractionJob>>;

    /// List jobs, most recent first
    async fn list(&self, filter: &JobFilter) -> Result<Vec<ExtractionJob>>;

    // ========== Reporting ==========

    /// Aggregate cost and token totals for a project
    async fn project_cost_summary(&self, project_id: &str) -> Result<JobCostSummary>;
}
