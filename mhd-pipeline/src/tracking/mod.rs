//! Experiment tracking and model registry
//!
//! The pipeline talks to one `Tracker`:
//! - `LocalTracker` keeps runs and the registry in the SQLite database
//! - `MlflowTracker` calls an MLflow tracking server over its REST API
//!
//! Model artifacts themselves always live in the local artifact store.

pub mod local;
pub mod mlflow;

pub use local::LocalTracker;
pub use mlflow::MlflowTracker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;

use mhd_common::config::{PipelineConfig, TrackingBackend};

use crate::error::PipelineResult;
use crate::models::{ModelVersion, Stage};

/// Lifecycle status of a tracked run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(RunStatus::Running),
            "FINISHED" => Some(RunStatus::Finished),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Tracked run as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub run_name: String,
    pub status: RunStatus,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Tracking server and model registry
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Open a run, returning its id
    async fn start_run(&self, run_name: &str, tags: &BTreeMap<String, String>) -> PipelineResult<String>;

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> PipelineResult<()>;

    async fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> PipelineResult<()>;

    async fn set_tags(&self, run_id: &str, tags: &BTreeMap<String, String>) -> PipelineResult<()>;

    /// Attach a named text document to a run
    async fn log_text(&self, run_id: &str, name: &str, text: &str) -> PipelineResult<()>;

    async fn end_run(&self, run_id: &str, status: RunStatus) -> PipelineResult<()>;

    async fn get_run(&self, run_id: &str) -> PipelineResult<Option<RunRecord>>;

    /// Create the registered model unless it already exists
    async fn ensure_registered_model(&self, name: &str) -> PipelineResult<()>;

    async fn create_model_version(&self, name: &str, source: &str, run_id: &str) -> PipelineResult<ModelVersion>;

    /// Move a version to `stage`, optionally archiving versions already there
    async fn transition_stage(
        &self,
        name: &str,
        version: &str,
        stage: Stage,
        archive_existing: bool,
    ) -> PipelineResult<ModelVersion>;

    /// Highest version currently at `stage`
    async fn latest_version(&self, name: &str, stage: Stage) -> PipelineResult<Option<ModelVersion>>;
}

/// Tracker selected by `[tracking] backend`
pub fn tracker_from_config(config: &PipelineConfig, db: SqlitePool) -> PipelineResult<Arc<dyn Tracker>> {
    Ok(match config.tracking.backend {
        TrackingBackend::Local => Arc::new(LocalTracker::new(db, &config.tracking.experiment)),
        TrackingBackend::Mlflow => Arc::new(MlflowTracker::new(
            &config.tracking.uri,
            &config.tracking.experiment,
        )?),
    })
}

/// Run a whole tracked block: open, run `body`, close as finished or failed
pub async fn with_run<T, F, Fut>(
    tracker: &dyn Tracker,
    run_name: &str,
    tags: &BTreeMap<String, String>,
    body: F,
) -> PipelineResult<T>
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = PipelineResult<T>>,
{
    let run_id = tracker.start_run(run_name, tags).await?;
    match body(run_id.clone()).await {
        Ok(value) => {
            tracker.end_run(&run_id, RunStatus::Finished).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(end_err) = tracker.end_run(&run_id, RunStatus::Failed).await {
                tracing::warn!(run_id = %run_id, error = %end_err, "Failed to close run after error");
            }
            Err(err)
        }
    }
}
