//! Prediction serving
//!
//! The current model is resolved per request, so a new manifest takes
//! effect on the next call. Every request appends an `api_metrics` row,
//! failed ones included.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use mhd_common::time::now;

use crate::db::predictions::{insert_api_metric, insert_predictions};
use crate::error::{ApiError, ApiResult};
use crate::features::SessionInputs;
use crate::ml::ModelArtifact;
use crate::models::{ApiMetric, FeatureMap, Prediction, UseCase};
use crate::monitoring::endpoint_for;
use crate::pipeline::ModelInfo;
use crate::AppState;

/// Plausible athlete ages accepted by the risk endpoint
const AGE_RANGE: std::ops::RangeInclusive<f64> = 10.0..=100.0;

/// Risk request item: optional athlete id plus named numeric features
#[derive(Debug, Clone, Deserialize)]
pub struct RiskItem {
    #[serde(default)]
    pub athlete_id: Option<String>,
    #[serde(flatten)]
    pub features: FeatureMap,
}

#[derive(Debug, Deserialize)]
pub struct RiskRequest {
    pub items: Vec<RiskItem>,
}

#[derive(Debug, Serialize)]
pub struct RiskScore {
    pub risk: f64,
    pub model_run_id: String,
    pub model_version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RiskResponse {
    pub predictions: Vec<RiskScore>,
    pub model_info: ModelInfo,
}

/// Session request item
#[derive(Debug, Clone, Deserialize)]
pub struct SessionItem {
    #[serde(default)]
    pub athlete_id: Option<String>,
    #[serde(flatten)]
    pub inputs: SessionInputs,
}

#[derive(Debug, Deserialize)]
pub struct SessionScoreRequest {
    pub items: Vec<SessionItem>,
}

#[derive(Debug, Serialize)]
pub struct SessionScoreResponse {
    pub predictions: Vec<f64>,
    pub meta: ModelInfo,
}

async fn resolve_model(state: &AppState, use_case: UseCase) -> ApiResult<(ModelArtifact, ModelInfo)> {
    let model_name = state.ctx.registry_model_name(use_case);
    Ok(state
        .ctx
        .loader
        .load_latest_or_production(use_case, Some(&model_name))
        .await?)
}

/// Score `rows`, then persist the predictions
async fn serve(
    state: &AppState,
    use_case: UseCase,
    rows: Vec<(Option<String>, FeatureMap)>,
) -> ApiResult<(Vec<f64>, ModelInfo)> {
    let (model, info) = resolve_model(state, use_case).await?;
    let ts = now();
    let predictions: Vec<Prediction> = rows
        .into_iter()
        .map(|(athlete_id, features)| Prediction {
            id: Uuid::new_v4(),
            ts,
            athlete_id,
            use_case,
            score: model.score(&features),
            features,
            run_id: info.run_id.clone(),
            model_version: info.model_version.clone(),
        })
        .collect();
    insert_predictions(&state.ctx.db, &predictions).await?;
    Ok((predictions.iter().map(|p| p.score).collect(), info))
}

/// Append the telemetry row of one request; never fails the request
async fn record_request<T>(
    state: &AppState,
    use_case: UseCase,
    started: Instant,
    n: usize,
    outcome: &ApiResult<(T, ModelInfo)>,
) {
    let metric = ApiMetric {
        ts: now(),
        endpoint: endpoint_for(use_case).to_string(),
        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        n: n as i64,
        run_id: outcome.as_ref().ok().map(|(_, info)| info.run_id.clone()),
        ok: outcome.is_ok(),
    };
    if let Err(e) = insert_api_metric(&state.ctx.db, &metric).await {
        tracing::warn!(endpoint = %metric.endpoint, error = %e, "Failed to record API metric");
    }
}

/// POST /predict/risk
pub async fn predict_risk(
    State(state): State<AppState>,
    Json(request): Json<RiskRequest>,
) -> ApiResult<Json<RiskResponse>> {
    let started = Instant::now();
    if request.items.is_empty() {
        return Err(ApiError::BadRequest("No rows provided".to_string()));
    }
    for (i, item) in request.items.iter().enumerate() {
        if let Some(age) = item.features.get("age") {
            if !AGE_RANGE.contains(age) {
                return Err(ApiError::BadRequest(format!(
                    "item {}: age {} outside {}..={}",
                    i,
                    age,
                    AGE_RANGE.start(),
                    AGE_RANGE.end()
                )));
            }
        }
    }

    let n = request.items.len();
    let rows = request
        .items
        .into_iter()
        .map(|item| (item.athlete_id, item.features))
        .collect();
    let outcome = serve(&state, UseCase::InjuryRisk, rows).await;
    record_request(&state, UseCase::InjuryRisk, started, n, &outcome).await;
    let (scores, info) = outcome?;

    Ok(Json(RiskResponse {
        predictions: scores
            .into_iter()
            .map(|risk| RiskScore {
                risk,
                model_run_id: info.run_id.clone(),
                model_version: info.model_version.clone(),
            })
            .collect(),
        model_info: info,
    }))
}

/// POST /predict/session_score
pub async fn predict_session_score(
    State(state): State<AppState>,
    Json(request): Json<SessionScoreRequest>,
) -> ApiResult<Json<SessionScoreResponse>> {
    let started = Instant::now();
    if request.items.is_empty() {
        return Err(ApiError::BadRequest("No rows provided".to_string()));
    }

    let n = request.items.len();
    let rows = request
        .items
        .into_iter()
        .map(|item| (item.athlete_id, item.inputs.features()))
        .collect();
    let outcome = serve(&state, UseCase::SessionQuality, rows).await;
    record_request(&state, UseCase::SessionQuality, started, n, &outcome).await;
    let (predictions, meta) = outcome?;

    Ok(Json(SessionScoreResponse { predictions, meta }))
}

/// Build prediction routes
pub fn predict_routes() -> Router<AppState> {
    Router::new()
        .route("/predict/risk", post(predict_risk))
        .route("/predict/session_score", post(predict_session_score))
}
