//! Extraction job record and its state machine
//!
//! `pending -> running -> {completed | failed}`. Both terminal states are
//! final; a failed scene is retried by submitting a new job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::cost::TokenUsage;
use crate::error::{Error, Result};

/// Reason recorded on jobs cancelled by a caller
pub const CANCELLED_REASON: &str = "cancelled by request";

/// Which extraction strategy a job runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    /// Remote language model; high quality, billed per token
    #[default]
    Llm,
    /// Local pattern-based recognizer; free
    Ner,
}

impl ExtractorKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "llm" | "model" | "remote" => Some(Self::Llm),
            "ner" | "local" => Some(Self::Ner),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Ner => "ner",
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an extraction job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// True once the job can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows `self -> next`
    ///
    /// A pending job may fail without running, e.g. when cancelled while
    /// still queued.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One tracked unit of extraction work against one scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub id: String,
    pub project_id: String,
    pub scene_id: String,
    pub extractor: ExtractorKind,
    pub status: JobStatus,
    pub entities_found: u32,
    pub relationships_found: u32,
    /// Monetary cost in USD; zero for the local extractor
    pub cost: f64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub model: Option<String>,
    pub error_message: Option<String>,
    /// Failed because a caller cancelled it
    #[serde(default)]
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExtractionJob {
    /// Create a pending job
    pub fn new(
        project_id: impl Into<String>,
        scene_id: impl Into<String>,
        extractor: ExtractorKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            scene_id: scene_id.into(),
            extractor,
            status: JobStatus::Pending,
            entities_found: 0,
            relationships_found: 0,
            cost: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            model: None,
            error_message: None,
            cancelled: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Validation(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// pending -> running
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running -> completed, recording what the extractor found
    pub fn complete(&mut self, entities_found: u32, relationships_found: u32) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.entities_found = entities_found;
        self.relationships_found = relationships_found;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// pending|running -> failed
    pub fn fail(&mut self, error_message: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// pending|running -> failed with the cancellation reason
    pub fn cancel(&mut self) -> Result<()> {
        self.fail(CANCELLED_REASON)?;
        self.cancelled = true;
        Ok(())
    }

    /// Attach token usage and its priced cost
    pub fn record_usage(&mut self, model: impl Into<String>, tokens: TokenUsage, cost: f64) {
        self.model = Some(model.into());
        self.input_tokens = tokens.input_tokens;
        self.output_tokens = tokens.output_tokens;
        self.cost = cost;
    }

    /// Wall-clock run time, once the job has finished
    pub fn duration_ms(&self) -> Option<i64> {
        let end = self.completed_at?;
        let start = self.started_at.unwrap_or(self.created_at);
        Some((end - start).num_milliseconds().max(0))
    }
}
