//! Training frames assembled from the feature store
//!
//! Feature vectors join their targets on exact `(athlete_id, ts)`; vectors
//! without a matching target are dropped.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};

use crate::db::{
    features::{load_features, load_labels},
    records::load_sessions,
};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Cell, Frame};
use crate::models::FeatureVector;

/// Target column of assembled frames
pub const TARGET: &str = "y";

/// Frame of feature columns (missing features → 0.0) plus the target
fn frame_from_joined(rows: &[(&FeatureVector, f64)]) -> PipelineResult<Frame> {
    let names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|(fv, _)| fv.x.keys().map(String::as_str))
        .collect();

    let mut columns: Vec<(String, Vec<Cell>)> = names
        .iter()
        .map(|name| {
            let cells = rows
                .iter()
                .map(|(fv, _)| Cell::from(fv.x.get(*name).copied().unwrap_or(0.0)))
                .collect();
            (name.to_string(), cells)
        })
        .collect();
    columns.push((
        TARGET.to_string(),
        rows.iter().map(|(_, y)| Cell::Num(*y)).collect(),
    ));
    Frame::from_columns(columns)
}

/// Injury-risk vectors joined to their horizon labels
pub async fn injury_training_frame(pool: &SqlitePool, version: &str, horizon_days: i64) -> PipelineResult<Frame> {
    let features = load_features(pool, version).await?;
    let labels = load_labels(pool, horizon_days).await?;
    if features.is_empty() || labels.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "No features or labels found (version {}, horizon {}d)",
            version, horizon_days
        )));
    }

    let by_key: HashMap<(&str, DateTime<Utc>), u8> = labels
        .iter()
        .map(|l| ((l.athlete_id.as_str(), l.ts), l.y))
        .collect();
    let joined: Vec<(&FeatureVector, f64)> = features
        .iter()
        .filter_map(|fv| {
            by_key
                .get(&(fv.athlete_id.as_str(), fv.ts))
                .map(|&y| (fv, f64::from(y)))
        })
        .collect();

    if joined.len() < features.len() {
        tracing::warn!(
            version,
            unmatched = features.len() - joined.len(),
            "Feature vectors without a label at the same timestamp were dropped"
        );
    }
    if joined.is_empty() {
        return Err(PipelineError::InsufficientData(
            "No feature vector matched a label".to_string(),
        ));
    }
    frame_from_joined(&joined)
}

/// Session vectors joined to the coach rating of the same session
pub async fn session_training_frame(pool: &SqlitePool, version: &str) -> PipelineResult<Frame> {
    let features = load_features(pool, version).await?;
    if features.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "No session features found (version {})",
            version
        )));
    }

    let sessions = load_sessions(pool, None).await?;
    let ratings: HashMap<(&str, DateTime<Utc>), f64> = sessions
        .iter()
        .filter_map(|s| s.coach_rating.map(|r| ((s.athlete_id.as_str(), s.ts), r)))
        .collect();
    if ratings.is_empty() {
        return Err(PipelineError::InsufficientData("No coach ratings present".to_string()));
    }

    let joined: Vec<(&FeatureVector, f64)> = features
        .iter()
        .filter_map(|fv| {
            ratings
                .get(&(fv.athlete_id.as_str(), fv.ts))
                .map(|&r| (fv, r))
        })
        .collect();
    if joined.is_empty() {
        return Err(PipelineError::InsufficientData(
            "No session feature vector matched a coach rating".to_string(),
        ));
    }
    frame_from_joined(&joined)
}
