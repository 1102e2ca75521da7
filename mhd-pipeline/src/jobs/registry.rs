//! Persistent job registry
//!
//! Every state change is loaded, validated against the job state machine and
//! written back, so a job row only ever moves forward.

use sqlx::SqlitePool;
use uuid::Uuid;

use mhd_common::{Error, Result};

use crate::db::jobs::{list_jobs, load_job, load_unfinished_jobs, save_job};
use crate::models::{Job, JobResult, JobStatus, PipelineKind, TrainParams};

/// Error recorded on jobs found unfinished at startup
pub const INTERRUPTED_ERROR: &str = "interrupted by restart";

#[derive(Clone)]
pub struct JobRegistry {
    db: SqlitePool,
}

impl JobRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// New `queued` job
    pub async fn create_job(&self, kind: PipelineKind, params: TrainParams) -> Result<Job> {
        let job = Job::new(kind, params);
        save_job(&self.db, &job).await?;
        tracing::info!(job_id = %job.id, kind = %job.kind, "Job queued");
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        load_job(&self.db, id).await
    }

    /// Most recent first
    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        list_jobs(&self.db, limit).await
    }

    async fn update<F>(&self, id: Uuid, apply: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let mut job = load_job(&self.db, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Job not found: {}", id)))?;
        apply(&mut job)?;
        save_job(&self.db, &job).await?;
        Ok(job)
    }

    pub async fn mark_running(&self, id: Uuid) -> Result<Job> {
        self.update(id, |job| job.transition_to(JobStatus::Running)).await
    }

    pub async fn mark_succeeded(&self, id: Uuid, result: JobResult) -> Result<Job> {
        self.update(id, |job| job.succeed(result)).await
    }

    pub async fn mark_failed(&self, id: Uuid, error: String, traceback: String) -> Result<Job> {
        self.update(id, |job| job.fail(error, traceback)).await
    }

    /// Fail jobs a previous process left `queued` or `running`
    pub async fn fail_stale_jobs(&self) -> Result<usize> {
        let stale = load_unfinished_jobs(&self.db).await?;
        for mut job in stale.iter().cloned() {
            job.fail(
                INTERRUPTED_ERROR.to_string(),
                format!("{} (status was {})", INTERRUPTED_ERROR, job.status),
            )?;
            save_job(&self.db, &job).await?;
            tracing::warn!(job_id = %job.id, kind = %job.kind, "Marked interrupted job as failed");
        }
        Ok(stale.len())
    }
}
