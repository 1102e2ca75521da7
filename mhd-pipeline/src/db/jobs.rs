//! Job persistence

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;
use mhd_common::time::{format_ts, parse_ts};
use mhd_common::{Error, Result};

use crate::models::{Job, JobStatus, PipelineKind};

/// Insert or update a job row
pub async fn save_job(pool: &SqlitePool, job: &Job) -> Result<()> {
    let params = serde_json::to_string(&job.params)?;
    let result = job.result.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, kind, status, params, result, error, traceback,
            created_at, started_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            result = excluded.result,
            error = excluded.error,
            traceback = excluded.traceback,
            started_at = excluded.started_at,
            finished_at = excluded.finished_at
        "#,
    )
    .bind(job.id.to_string())
    .bind(job.kind.as_str())
    .bind(job.status.as_str())
    .bind(&params)
    .bind(&result)
    .bind(&job.error)
    .bind(&job.traceback)
    .bind(format_ts(&job.created_at))
    .bind(job.started_at.as_ref().map(format_ts))
    .bind(job.finished_at.as_ref().map(format_ts))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one job
pub async fn load_job(pool: &SqlitePool, id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query(
        r#"
        SELECT id, kind, status, params, result, error, traceback,
               created_at, started_at, finished_at
        FROM jobs
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Most recent jobs first
pub async fn list_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<Job>> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, status, params, result, error, traceback,
               created_at, started_at, finished_at
        FROM jobs
        ORDER BY created_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Jobs left `queued` or `running` by a previous process
pub async fn load_unfinished_jobs(pool: &SqlitePool) -> Result<Vec<Job>> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, status, params, result, error, traceback,
               created_at, started_at, finished_at
        FROM jobs
        WHERE status IN ('queued', 'running')
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Failed to parse job id: {}", e)))?;

    let kind: String = row.get("kind");
    let kind = PipelineKind::parse(&kind)
        .ok_or_else(|| Error::Internal(format!("Unknown pipeline kind: {}", kind)))?;

    let status: String = row.get("status");
    let status = JobStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown job status: {}", status)))?;

    let params: String = row.get("params");
    let result: Option<String> = row.get("result");
    let created_at: String = row.get("created_at");
    let started_at: Option<String> = row.get("started_at");
    let finished_at: Option<String> = row.get("finished_at");

    Ok(Job {
        id,
        kind,
        status,
        params: serde_json::from_str(&params)?,
        result: result.as_deref().map(serde_json::from_str).transpose()?,
        error: row.get("error"),
        traceback: row.get("traceback"),
        created_at: parse_ts(&created_at)?,
        started_at: started_at.as_deref().map(parse_ts).transpose()?,
        finished_at: finished_at.as_deref().map(parse_ts).transpose()?,
    })
}
