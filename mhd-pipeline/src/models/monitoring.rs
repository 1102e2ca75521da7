//! Serving telemetry and monitoring rollup rows

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::UseCase;

/// Latency/volume sample of one serving request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMetric {
    pub ts: DateTime<Utc>,
    pub endpoint: String,
    pub latency_ms: f64,
    pub n: i64,
    pub run_id: Option<String>,
    pub ok: bool,
}

/// Population stability index of one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMetric {
    pub ts: DateTime<Utc>,
    pub feature: String,
    pub psi: f64,
}

/// Precision@k of one day's injury-risk predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyModelMetric {
    pub day: NaiveDate,
    pub n: i64,
    pub k_pct: f64,
    pub k: i64,
    pub precision_at_k: f64,
}

/// Low/medium/high counts of risk scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskBuckets {
    pub low: i64,
    pub medium: i64,
    pub high: i64,
}

/// Daily dashboard rollup per use case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub date: NaiveDate,
    pub use_case: UseCase,
    pub n_predictions: i64,
    pub risk_buckets: RiskBuckets,
    pub score_avg: Option<f64>,
    pub topk_k: Option<i64>,
    pub topk_precision: Option<f64>,
    pub latency_ms_avg: Option<f64>,
    pub error_rate: f64,
}
