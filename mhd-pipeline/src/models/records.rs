//! Raw event records and derived feature-store rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::UseCase;

/// Named numeric feature bag
pub type FeatureMap = BTreeMap<String, f64>;

/// One training session as logged by an athlete or coach
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub athlete_id: String,
    pub ts: DateTime<Utc>,
    /// Work volume (load units)
    pub volume: Option<f64>,
    /// Work intensity (RPE scale)
    pub intensity: Option<f64>,
    /// Fraction of the prescribed plan completed
    pub adherence: Option<f64>,
    /// Note sentiment in [-1, 1]
    pub sentiment: Option<f64>,
    /// Topics extracted from session notes
    #[serde(default)]
    pub topics: Vec<String>,
    pub sets: Option<f64>,
    pub reps: Option<f64>,
    pub rpe: Option<f64>,
    pub rest_s: Option<f64>,
    pub completed_pct: Option<f64>,
    /// NLP tag scores (`fatigue`, `pain_knee`, `sleep_poor`, ...)
    #[serde(default)]
    pub nlp_tags: FeatureMap,
    /// Coach rating 1..5, the session-quality target
    pub coach_rating: Option<f64>,
}

/// Daily vitals reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalRecord {
    pub id: String,
    pub athlete_id: String,
    pub ts: DateTime<Utc>,
    pub resting_hr: Option<f64>,
    pub sleep_hours: Option<f64>,
}

/// Injury outcome event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryRecord {
    pub id: String,
    pub athlete_id: String,
    pub onset_date: DateTime<Utc>,
    pub body_part: Option<String>,
}

/// Per-athlete, per-timestamp, per-version feature bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub athlete_id: String,
    pub ts: DateTime<Utc>,
    pub version: String,
    pub x: FeatureMap,
}

/// Supervised target for the feature vector with the same (athlete_id, ts)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub athlete_id: String,
    pub ts: DateTime<Utc>,
    pub horizon_days: i64,
    pub y: u8,
}

/// One served inference result (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub athlete_id: Option<String>,
    pub use_case: UseCase,
    pub features: FeatureMap,
    pub score: f64,
    pub run_id: String,
    pub model_version: Option<String>,
}
