//! Training triggers, job status and feature/label builds
//!
//! POST /pipeline/train, GET /pipeline/status/:job_id, GET /pipeline/jobs,
//! POST /pipeline/train-from-blob, POST /pipeline/features/:set,
//! POST /pipeline/labels

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{Job, JobStatus, PipelineKind, TrainParams};
use crate::pipeline::{BlobTraining, FeatureSet};
use crate::AppState;

const DEFAULT_JOB_LIMIT: i64 = 20;
const MAX_JOB_LIMIT: i64 = 200;

/// POST /pipeline/train request
#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub pipeline: String,
    #[serde(default)]
    pub params: TrainParams,
}

/// POST /pipeline/train response
#[derive(Debug, Serialize)]
pub struct TrainResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
pub struct BlobQuery {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct LabelsQuery {
    pub horizon_days: Option<i64>,
}

/// Feature/label build response
#[derive(Debug, Serialize)]
pub struct BuildResponse {
    pub written: usize,
}

/// POST /pipeline/train
///
/// Queue a named pipeline; poll /pipeline/status/:job_id for the outcome.
pub async fn train(
    State(state): State<AppState>,
    Json(request): Json<TrainRequest>,
) -> ApiResult<Json<TrainResponse>> {
    let kind = PipelineKind::parse(&request.pipeline).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Unknown pipeline '{}' (expected generic, injury_risk or session_quality)",
            request.pipeline
        ))
    })?;
    let job = state.queue.submit(kind, request.params).await?;
    Ok(Json(TrainResponse {
        job_id: job.id,
        status: job.status,
    }))
}

/// GET /pipeline/status/:job_id
pub async fn job_status(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> ApiResult<Json<Job>> {
    let job = state
        .queue
        .registry()
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;
    Ok(Json(job))
}

/// GET /pipeline/jobs?limit=
pub async fn list_jobs(State(state): State<AppState>, Query(query): Query<JobsQuery>) -> ApiResult<Json<JobsResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_JOB_LIMIT).clamp(1, MAX_JOB_LIMIT);
    let jobs = state.queue.registry().list_jobs(limit).await?;
    Ok(Json(JobsResponse { jobs }))
}

/// POST /pipeline/train-from-blob?key=
///
/// Synchronous CSV training from the raw container.
pub async fn train_from_blob(
    State(state): State<AppState>,
    Query(query): Query<BlobQuery>,
) -> ApiResult<Json<BlobTraining>> {
    Ok(Json(state.ctx.train_from_blob(&query.key).await?))
}

/// POST /pipeline/features/:set
pub async fn build_features(State(state): State<AppState>, Path(set): Path<String>) -> ApiResult<Json<BuildResponse>> {
    let set = FeatureSet::parse(&set)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown feature set: {} (expected risk or session)", set)))?;
    let written = state.ctx.build_features(set).await?;
    Ok(Json(BuildResponse { written }))
}

/// POST /pipeline/labels?horizon_days=
pub async fn build_labels(
    State(state): State<AppState>,
    Query(query): Query<LabelsQuery>,
) -> ApiResult<Json<BuildResponse>> {
    let written = state.ctx.build_labels(query.horizon_days).await?;
    Ok(Json(BuildResponse { written }))
}

/// Build pipeline routes
pub fn pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/pipeline/train", post(train))
        .route("/pipeline/status/:job_id", get(job_status))
        .route("/pipeline/jobs", get(list_jobs))
        .route("/pipeline/train-from-blob", post(train_from_blob))
        .route("/pipeline/features/:set", post(build_features))
        .route("/pipeline/labels", post(build_labels))
}
