//! Served predictions and serving telemetry (append-only)

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use mhd_common::time::{format_ts, parse_ts};
use mhd_common::{Error, Result};

use crate::models::{ApiMetric, Prediction, UseCase};

/// Append a batch of predictions in one transaction
pub async fn insert_predictions(pool: &SqlitePool, predictions: &[Prediction]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for p in predictions {
        let features = serde_json::to_string(&p.features)?;
        sqlx::query(
            r#"
            INSERT INTO predictions (id, ts, athlete_id, use_case, features, score, run_id, model_version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(p.id.to_string())
        .bind(format_ts(&p.ts))
        .bind(&p.athlete_id)
        .bind(p.use_case.as_str())
        .bind(&features)
        .bind(p.score)
        .bind(&p.run_id)
        .bind(&p.model_version)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Predictions of a use case with `start <= ts < end`, oldest first
pub async fn load_predictions(
    pool: &SqlitePool,
    use_case: UseCase,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Prediction>> {
    let rows = sqlx::query(
        r#"
        SELECT id, ts, athlete_id, use_case, features, score, run_id, model_version
        FROM predictions
        WHERE use_case = ? AND ts >= ? AND ts < ?
        ORDER BY ts, id
        "#,
    )
    .bind(use_case.as_str())
    .bind(format_ts(&start))
    .bind(format_ts(&end))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            let ts: String = row.get("ts");
            let features: String = row.get("features");
            Ok(Prediction {
                id: Uuid::parse_str(&id)
                    .map_err(|e| Error::Internal(format!("Failed to parse prediction id: {}", e)))?,
                ts: parse_ts(&ts)?,
                athlete_id: row.get("athlete_id"),
                use_case,
                features: serde_json::from_str(&features)?,
                score: row.get("score"),
                run_id: row.get("run_id"),
                model_version: row.get("model_version"),
            })
        })
        .collect()
}

/// Append one serving telemetry sample
pub async fn insert_api_metric(pool: &SqlitePool, metric: &ApiMetric) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO api_metrics (ts, endpoint, latency_ms, n, run_id, ok)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(format_ts(&metric.ts))
    .bind(&metric.endpoint)
    .bind(metric.latency_ms)
    .bind(metric.n)
    .bind(&metric.run_id)
    .bind(metric.ok)
    .execute(pool)
    .await?;

    Ok(())
}

/// Telemetry samples with `start <= ts < end`
pub async fn load_api_metrics(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<ApiMetric>> {
    let rows = sqlx::query(
        r#"
        SELECT ts, endpoint, latency_ms, n, run_id, ok
        FROM api_metrics
        WHERE ts >= ? AND ts < ?
        ORDER BY ts
        "#,
    )
    .bind(format_ts(&start))
    .bind(format_ts(&end))
    .fetch_all(pool)
    .await?;

    rows.iter().map(api_metric_from_row).collect()
}

/// Latest telemetry samples, newest first
pub async fn recent_api_metrics(pool: &SqlitePool, limit: i64) -> Result<Vec<ApiMetric>> {
    let rows = sqlx::query(
        r#"
        SELECT ts, endpoint, latency_ms, n, run_id, ok
        FROM api_metrics
        ORDER BY ts DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(api_metric_from_row).collect()
}

fn api_metric_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ApiMetric> {
    let ts: String = row.get("ts");
    Ok(ApiMetric {
        ts: parse_ts(&ts)?,
        endpoint: row.get("endpoint"),
        latency_ms: row.get("latency_ms"),
        n: row.get("n"),
        run_id: row.get("run_id"),
        ok: row.get("ok"),
    })
}
