//! Dashboard metric summaries
//!
//! GET /metrics/risk/summary, GET /metrics/session/summary, GET /metrics/api,
//! GET /metrics/drift

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use mhd_common::time::now;

use crate::db::{
    predictions::{load_predictions, recent_api_metrics},
    rollups::{load_aggregate, recent_drift},
};
use crate::error::ApiResult;
use crate::models::{ApiMetric, DriftMetric, RiskBuckets, UseCase};
use crate::AppState;

const TREND_DAYS: i64 = 7;
const API_METRICS_LIMIT: i64 = 500;
const DEFAULT_DRIFT_LIMIT: i64 = 30;

#[derive(Debug, Serialize)]
pub struct TrendPoint {
    /// 0 = six days ago, 6 = today
    pub day: i64,
    pub high_count: i64,
}

#[derive(Debug, Serialize)]
pub struct RiskSummary {
    pub buckets: RiskBuckets,
    pub trend: Vec<TrendPoint>,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    /// Rounded score (0..=5) → count over the last 24 hours
    pub score_hist: BTreeMap<u8, i64>,
}

#[derive(Debug, Serialize)]
pub struct ApiMetricsResponse {
    pub count: usize,
    pub items: Vec<ApiMetric>,
}

/// Score rounded and clamped into the 0..=5 histogram
pub fn score_bin(score: f64) -> u8 {
    score.clamp(0.0, 5.0).round() as u8
}

/// GET /metrics/risk/summary
pub async fn risk_summary(State(state): State<AppState>) -> ApiResult<Json<RiskSummary>> {
    let today = now().date_naive();
    let buckets = load_aggregate(&state.ctx.db, today, UseCase::InjuryRisk)
        .await?
        .map(|agg| agg.risk_buckets)
        .unwrap_or_default();

    let mut trend = Vec::with_capacity(TREND_DAYS as usize);
    for day in 0..TREND_DAYS {
        let date = today - Duration::days(TREND_DAYS - 1 - day);
        let high_count = load_aggregate(&state.ctx.db, date, UseCase::InjuryRisk)
            .await?
            .map(|agg| agg.risk_buckets.high)
            .unwrap_or(0);
        trend.push(TrendPoint { day, high_count });
    }

    Ok(Json(RiskSummary { buckets, trend }))
}

/// GET /metrics/session/summary
pub async fn session_summary(State(state): State<AppState>) -> ApiResult<Json<SessionSummary>> {
    let end = now();
    let predictions = load_predictions(&state.ctx.db, UseCase::SessionQuality, end - Duration::days(1), end).await?;

    let mut score_hist: BTreeMap<u8, i64> = (0..=5).map(|bin| (bin, 0)).collect();
    for p in &predictions {
        *score_hist.entry(score_bin(p.score)).or_default() += 1;
    }
    Ok(Json(SessionSummary { score_hist }))
}

/// GET /metrics/api
pub async fn api_metrics(State(state): State<AppState>) -> ApiResult<Json<ApiMetricsResponse>> {
    let items = recent_api_metrics(&state.ctx.db, API_METRICS_LIMIT).await?;
    Ok(Json(ApiMetricsResponse {
        count: items.len(),
        items,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DriftQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DriftResponse {
    pub items: Vec<DriftMetric>,
}

/// GET /metrics/drift?limit=
///
/// Stored PSI measurements, newest first.
pub async fn drift_history(
    State(state): State<AppState>,
    Query(query): Query<DriftQuery>,
) -> ApiResult<Json<DriftResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_DRIFT_LIMIT).clamp(1, API_METRICS_LIMIT);
    let items = recent_drift(&state.ctx.db, limit).await?;
    Ok(Json(DriftResponse { items }))
}

/// Build metrics routes
pub fn metrics_routes() -> Router<AppState> {
    Router::new()
        .route("/metrics/risk/summary", get(risk_summary))
        .route("/metrics/session/summary", get(session_summary))
        .route("/metrics/api", get(api_metrics))
        .route("/metrics/drift", get(drift_history))
}
