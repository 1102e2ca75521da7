//! Deployed model inspection
//!
//! GET /models/current, GET /models/compare

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::{DeploymentManifest, ModelVersion, Stage, UseCase};
use crate::tracking::RunRecord;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CurrentQuery {
    pub use_case: Option<String>,
}

/// GET /models/current response
#[derive(Debug, Serialize)]
pub struct CurrentModelResponse {
    pub use_case: UseCase,
    /// Serving pointer; wins over the registry when present
    pub manifest: Option<DeploymentManifest>,
    pub registry_model: String,
    pub production: Option<ModelVersion>,
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    /// Comma-separated run ids
    pub runs: String,
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub runs: Vec<RunRecord>,
}

/// GET /models/current?use_case=
pub async fn current_model(
    State(state): State<AppState>,
    Query(query): Query<CurrentQuery>,
) -> ApiResult<Json<CurrentModelResponse>> {
    let use_case = match query.use_case.as_deref() {
        None => UseCase::InjuryRisk,
        Some(name) => UseCase::parse(name)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown use case: {}", name)))?,
    };
    let manifest = state.ctx.deployer.read_manifest(use_case)?;
    let registry_model = state.ctx.registry_model_name(use_case);
    let production = state
        .ctx
        .tracker
        .latest_version(&registry_model, Stage::Production)
        .await?;

    Ok(Json(CurrentModelResponse {
        use_case,
        manifest,
        registry_model,
        production,
    }))
}

/// GET /models/compare?runs=a,b
pub async fn compare_runs(
    State(state): State<AppState>,
    Query(query): Query<CompareQuery>,
) -> ApiResult<Json<CompareResponse>> {
    let ids: Vec<&str> = query
        .runs
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(ApiError::BadRequest("runs must list at least one run id".to_string()));
    }

    let mut runs = Vec::with_capacity(ids.len());
    for id in ids {
        let run = state
            .ctx
            .tracker
            .get_run(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Run not found: {}", id)))?;
        runs.push(run);
    }
    Ok(Json(CompareResponse { runs }))
}

/// Build model routes
pub fn model_routes() -> Router<AppState> {
    Router::new()
        .route("/models/current", get(current_model))
        .route("/models/compare", get(compare_runs))
}
