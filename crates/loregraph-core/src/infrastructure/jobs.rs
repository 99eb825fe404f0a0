//! SQLite implementation of the JobRepository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::domain::extraction::{
    ExtractionJob, ExtractorKind, JobCostSummary, JobFilter, JobRepository, JobStatus,
};
use crate::error::{Error, Result};

const JOB_COLUMNS: &str = "id, project_id, scene_id, extractor, status, entities_found, \
     relationships_found, cost, input_tokens, output_tokens, model, error_message, cancelled, \
     created_at, started_at, completed_at";

/// SQLite implementation of the job repository
#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    /// Create a new SQLite job repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    // ========== Job CRUD ==========

    async fn insert(&self, job: &ExtractionJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO extraction_jobs (
                id, project_id, scene_id, extractor, status, entities_found,
                relationships_found, cost, input_tokens, output_tokens, model,
                error_message, cancelled, created_at, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.project_id)
        .bind(&job.scene_id)
        .bind(job.extractor.as_str())
        .bind(job.status.as_str())
        .bind(job.entities_found as i64)
        .bind(job.relationships_found as i64)
        .bind(job.cost)
        .bind(job.input_tokens as i64)
        .bind(job.output_tokens as i64)
        .bind(&job.model)
        .bind(&job.error_message)
        .bind(job.cancelled)
        .bind(job.created_at.to_rfc3339())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job.id, scene_id = %job.scene_id, "Job recorded");
        Ok(())
    }

    async fn update(&self, job: &ExtractionJob) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_jobs SET
                status = ?,
                entities_found = ?,
                relationships_found = ?,
                cost = ?,
                input_tokens = ?,
                output_tokens = ?,
                model = ?,
                error_message = ?,
                cancelled = ?,
                started_at = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.entities_found as i64)
        .bind(job.relationships_found as i64)
        .bind(job.cost)
        .bind(job.input_tokens as i64)
        .bind(job.output_tokens as i64)
        .bind(&job.model)
        .bind(&job.error_message)
        .bind(job.cancelled)
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .bind(&job.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(&job.id));
        }
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<ExtractionJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM extraction_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_job()).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<ExtractionJob>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM extraction_jobs WHERE 1 = 1", JOB_COLUMNS));
        if let Some(project_id) = &filter.project_id {
            query.push(" AND project_id = ").push_bind(project_id.clone());
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        query.push(" ORDER BY created_at DESC, id");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows: Vec<JobRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| r.into_job()).collect()
    }

    // ========== Reporting ==========

    async fn project_cost_summary(&self, project_id: &str) -> Result<JobCostSummary> {
        let row: SummaryRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS total_jobs,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed_jobs,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed_jobs,
                COALESCE(SUM(cost), 0.0) AS total_cost,
                COALESCE(SUM(input_tokens), 0) AS total_input_tokens,
                COALESCE(SUM(output_tokens), 0) AS total_output_tokens
            FROM extraction_jobs
            WHERE project_id = ?
            "#,
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobCostSummary {
            project_id: project_id.to_string(),
            total_jobs: row.total_jobs.max(0) as u64,
            completed_jobs: row.completed_jobs.max(0) as u64,
            failed_jobs: row.failed_jobs.max(0) as u64,
            total_cost: row.total_cost,
            total_input_tokens: row.total_input_tokens.max(0) as u64,
            total_output_tokens: row.total_output_tokens.max(0) as u64,
        })
    }
}

// ========== Database Row Types ==========

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    project_id: String,
    scene_id: String,
    extractor: String,
    status: String,
    entities_found: i64,
    relationships_found: i64,
    cost: f64,
    input_tokens: i64,
    output_tokens: i64,
    model: Option<String>,
    error_message: Option<String>,
    cancelled: bool,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid timestamp '{}': {}", raw, e)))
}

impl JobRow {
    fn into_job(self) -> Result<ExtractionJob> {
        let extractor = ExtractorKind::parse(&self.extractor)
            .ok_or_else(|| Error::Other(format!("Invalid extractor: {}", self.extractor)))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| Error::Other(format!("Invalid job status: {}", self.status)))?;

        Ok(ExtractionJob {
            id: self.id,
            project_id: self.project_id,
            scene_id: self.scene_id,
            extractor,
            status,
            entities_found: self.entities_found.max(0) as u32,
            relationships_found: self.relationships_found.max(0) as u32,
            cost: self.cost,
            input_tokens: self.input_tokens.max(0) as u32,
            output_tokens: self.output_tokens.max(0) as u32,
            model: self.model,
            error_message: self.error_message,
            cancelled: self.cancelled,
            created_at: parse_time(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_time).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    total_jobs: i64,
    completed_jobs: i64,
    failed_jobs: i64,
    total_cost: f64,
    total_input_tokens: i64,
    total_output_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::TokenUsage;
    use crate::storage::migrations::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqliteJobRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        run_migrations(&pool).await.expect("Failed to run migrations");

        SqliteJobRepository::new(pool)
    }

    #[tokio::test]
    async fn test_insert_update_get() {
        let repo = setup_test_db().await;
        let mut job = ExtractionJob::new("p1", "scene-1", ExtractorKind::Llm);
        repo.insert(&job).await.unwrap();

        let loaded = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.extractor, ExtractorKind::Llm);

        job.start().unwrap();
        job.record_usage("gpt-4o-mini", TokenUsage::new(1000, 200), 0.00027);
        job.complete(3, 2).unwrap();
        repo.update(&job).await.unwrap();

        let loaded = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.entities_found, 3);
        assert_eq!(loaded.relationships_found, 2);
        assert_eq!(loaded.input_tokens, 1000);
        assert_eq!(loaded.model.as_deref(), Some("gpt-4o-mini"));
        assert!(loaded.started_at.is_some());
        assert!(loaded.completed_at.is_some());

        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let repo = setup_test_db().await;
        let job = ExtractionJob::new("p1", "scene-1", ExtractorKind::Ner);
        let err = repo.update(&job).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let repo = setup_test_db().await;

        let mut done = ExtractionJob::new("p1", "a", ExtractorKind::Ner);
        done.start().unwrap();
        done.complete(1, 0).unwrap();
        repo.insert(&done).await.unwrap();

        let pending = ExtractionJob::new("p1", "b", ExtractorKind::Ner);
        repo.insert(&pending).await.unwrap();

        let other = ExtractionJob::new("p2", "c", ExtractorKind::Llm);
        repo.insert(&other).await.unwrap();

        let all = repo.list(&JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let p1 = repo.list(&JobFilter::for_project("p1")).await.unwrap();
        assert_eq!(p1.len(), 2);
        assert!(p1.iter().all(|j| j.project_id == "p1"));

        let completed = repo
            .list(&JobFilter::for_project("p1").with_status(JobStatus::Completed))
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done.id);

        let limited = repo.list(&JobFilter::default().with_limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_project_cost_summary() {
        let repo = setup_test_db().await;

        let mut first = ExtractionJob::new("p1", "a", ExtractorKind::Llm);
        first.start().unwrap();
        first.record_usage("m", TokenUsage::new(100, 50), 0.25);
        first.complete(2, 1).unwrap();
        repo.insert(&first).await.unwrap();

        let mut second = ExtractionJob::new("p1", "b", ExtractorKind::Llm);
        second.start().unwrap();
        second.record_usage("m", TokenUsage::new(10, 5), 0.5);
        second.fail("boom").unwrap();
        repo.insert(&second).await.unwrap();

        let summary = repo.project_cost_summary("p1").await.unwrap();
        assert_eq!(summary.total_jobs, 2);
        assert_eq!(summary.completed_jobs, 1);
        assert_eq!(summary.failed_jobs, 1);
        assert!((summary.total_cost - 0.75).abs() < 1e-9);
        assert_eq!(summary.total_input_tokens, 110);
        assert_eq!(summary.total_output_tokens, 55);

        let empty = repo.project_cost_summary("nobody").await.unwrap();
        assert_eq!(empty.total_jobs, 0);
        assert_eq!(empty.total_cost, 0.0);
    }
}
