//! Database initialization
//!
//! Creates the database file on first run and every table used by the
//! pipeline:
//! - raw records: `sessions`, `vitals`, `injuries`
//! - feature store: `features`, `labels`
//! - orchestration: `jobs`
//! - serving and monitoring: `predictions`, `api_metrics`, `drift_metrics`,
//!   `model_daily_metrics`, `metric_aggregates`
//! - local tracking server: `tracking_runs`, `registered_models`, `model_versions`

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the database at `db_path` and create all tables
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers while a pipeline run writes
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_tables(&pool).await?;
    Ok(pool)
}

/// Private in-memory database with all tables (tests and dry runs)
///
/// A single connection that is never recycled: every connection to
/// `sqlite::memory:` is its own database.
pub async fn init_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    create_tables(&pool).await?;
    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_sessions_table(pool).await?;
    create_vitals_table(pool).await?;
    create_injuries_table(pool).await?;
    create_features_table(pool).await?;
    create_labels_table(pool).await?;
    create_jobs_table(pool).await?;
    create_predictions_table(pool).await?;
    create_api_metrics_table(pool).await?;
    create_drift_metrics_table(pool).await?;
    create_model_daily_metrics_table(pool).await?;
    create_metric_aggregates_table(pool).await?;
    create_tracking_tables(pool).await?;
    Ok(())
}

async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            athlete_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            volume REAL,
            intensity REAL,
            adherence REAL,
            sentiment REAL,
            topics TEXT NOT NULL DEFAULT '[]',
            sets REAL,
            reps REAL,
            rpe REAL,
            rest_s REAL,
            completed_pct REAL,
            nlp_tags TEXT NOT NULL DEFAULT '{}',
            coach_rating REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_ts ON sessions(ts)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_athlete ON sessions(athlete_id, ts)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_vitals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vitals (
            id TEXT PRIMARY KEY,
            athlete_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            resting_hr REAL,
            sleep_hours REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vitals_ts ON vitals(ts)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_injuries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS injuries (
            id TEXT PRIMARY KEY,
            athlete_id TEXT NOT NULL,
            onset_date TEXT NOT NULL,
            body_part TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_injuries_onset ON injuries(athlete_id, onset_date)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_features_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS features (
            athlete_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            version TEXT NOT NULL,
            x TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (athlete_id, ts, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_features_version ON features(version)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_labels_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS labels (
            athlete_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            horizon_days INTEGER NOT NULL,
            y INTEGER NOT NULL CHECK (y IN (0, 1)),
            updated_at TEXT NOT NULL,
            PRIMARY KEY (athlete_id, ts, horizon_days)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('queued', 'running', 'succeeded', 'failed')),
            params TEXT NOT NULL DEFAULT '{}',
            result TEXT,
            error TEXT,
            traceback TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_predictions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            id TEXT PRIMARY KEY,
            ts TEXT NOT NULL,
            athlete_id TEXT,
            use_case TEXT NOT NULL,
            features TEXT NOT NULL DEFAULT '{}',
            score REAL NOT NULL,
            run_id TEXT NOT NULL,
            model_version TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_predictions_ts ON predictions(use_case, ts)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_api_metrics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            latency_ms REAL NOT NULL,
            n INTEGER NOT NULL DEFAULT 0,
            run_id TEXT,
            ok INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_metrics_ts ON api_metrics(ts)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_drift_metrics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS drift_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL,
            feature TEXT NOT NULL,
            psi REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_drift_metrics_ts ON drift_metrics(ts)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_model_daily_metrics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model_daily_metrics (
            day TEXT PRIMARY KEY,
            n INTEGER NOT NULL,
            k_pct REAL NOT NULL,
            k INTEGER NOT NULL,
            precision_at_k REAL NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_metric_aggregates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_aggregates (
            date TEXT NOT NULL,
            use_case TEXT NOT NULL,
            n_predictions INTEGER NOT NULL DEFAULT 0,
            risk_low INTEGER NOT NULL DEFAULT 0,
            risk_medium INTEGER NOT NULL DEFAULT 0,
            risk_high INTEGER NOT NULL DEFAULT 0,
            score_avg REAL,
            topk_k INTEGER,
            topk_precision REAL,
            latency_ms_avg REAL,
            error_rate REAL NOT NULL DEFAULT 0.0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (date, use_case)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tracking_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracking_runs (
            run_id TEXT PRIMARY KEY,
            experiment TEXT NOT NULL,
            run_name TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('RUNNING', 'FINISHED', 'FAILED')),
            params TEXT NOT NULL DEFAULT '{}',
            metrics TEXT NOT NULL DEFAULT '{}',
            tags TEXT NOT NULL DEFAULT '{}',
            texts TEXT NOT NULL DEFAULT '{}',
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registered_models (
            name TEXT PRIMARY KEY,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model_versions (
            name TEXT NOT NULL REFERENCES registered_models(name),
            version INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            source TEXT NOT NULL,
            stage TEXT NOT NULL DEFAULT 'None'
                CHECK (stage IN ('None', 'Staging', 'Production', 'Archived')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (name, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_has_all_tables() {
        let pool = init_in_memory().await.unwrap();
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        for expected in [
            "api_metrics",
            "drift_metrics",
            "features",
            "injuries",
            "jobs",
            "labels",
            "metric_aggregates",
            "model_daily_metrics",
            "model_versions",
            "predictions",
            "registered_models",
            "sessions",
            "tracking_runs",
            "vitals",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() {
        let pool = init_in_memory().await.unwrap();
        create_tables(&pool).await.unwrap();
        create_tables(&pool).await.unwrap();
    }
}
