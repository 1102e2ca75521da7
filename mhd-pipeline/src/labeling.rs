//! Injury labels for feature vectors
//!
//! A vector at `ts` is positive when the athlete has an injury onset in
//! `(ts, ts + horizon]`. Labels reuse the vector's exact timestamp.

use chrono::Duration;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::db::{
    features::{load_features, upsert_label},
    records::load_injuries,
};
use crate::error::{PipelineError, PipelineResult};
use crate::models::Label;

/// Label every vector of `version`; returns the number of labels written
pub async fn build_injury_labels(pool: &SqlitePool, version: &str, horizon_days: i64) -> PipelineResult<usize> {
    if horizon_days <= 0 {
        return Err(PipelineError::InvalidData(format!(
            "horizon must be a positive day count, got {}",
            horizon_days
        )));
    }
    let features = load_features(pool, version).await?;
    if features.is_empty() {
        tracing::info!(version, "No feature vectors to label");
        return Ok(0);
    }

    let injuries = load_injuries(pool, None, None).await?;
    let mut onsets: HashMap<&str, Vec<_>> = HashMap::new();
    for injury in &injuries {
        onsets.entry(injury.athlete_id.as_str()).or_default().push(injury.onset_date);
    }

    let horizon = Duration::days(horizon_days);
    let mut positives = 0;
    for fv in &features {
        let window_end = fv.ts + horizon;
        let hit = onsets
            .get(fv.athlete_id.as_str())
            .is_some_and(|list| list.iter().any(|&onset| onset > fv.ts && onset <= window_end));
        if hit {
            positives += 1;
        }
        upsert_label(
            pool,
            &Label {
                athlete_id: fv.athlete_id.clone(),
                ts: fv.ts,
                horizon_days,
                y: u8::from(hit),
            },
        )
        .await?;
    }

    tracing::info!(version, horizon_days, labels = features.len(), positives, "Built injury labels");
    Ok(features.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{features::{load_labels, upsert_feature}, records::save_injury};
    use crate::models::{FeatureMap, FeatureVector, InjuryRecord};
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    async fn seed(pool: &SqlitePool, athlete: &str, onset: DateTime<Utc>) {
        upsert_feature(
            pool,
            &FeatureVector {
                athlete_id: athlete.into(),
                ts: t0(),
                version: "risk_v1".into(),
                x: FeatureMap::from([("load_sum7".to_string(), 1.0)]),
            },
        )
        .await
        .unwrap();
        save_injury(
            pool,
            &InjuryRecord {
                id: format!("inj-{}", athlete),
                athlete_id: athlete.into(),
                onset_date: onset,
                body_part: None,
            },
        )
        .await
        .unwrap();
    }

    fn label_of<'a>(labels: &'a [Label], athlete: &str) -> &'a Label {
        labels.iter().find(|l| l.athlete_id == athlete).unwrap()
    }

    #[tokio::test]
    async fn test_horizon_end_is_inclusive() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        seed(&pool, "on_boundary", t0() + Duration::days(14)).await;
        seed(&pool, "one_day_late", t0() + Duration::days(15)).await;
        seed(&pool, "same_instant", t0()).await;
        seed(&pool, "before", t0() - Duration::days(1)).await;

        assert_eq!(build_injury_labels(&pool, "risk_v1", 14).await.unwrap(), 4);
        let labels = load_labels(&pool, 14).await.unwrap();

        assert_eq!(label_of(&labels, "on_boundary").y, 1);
        assert_eq!(label_of(&labels, "one_day_late").y, 0);
        assert_eq!(label_of(&labels, "same_instant").y, 0);
        assert_eq!(label_of(&labels, "before").y, 0);
        assert!(labels.iter().all(|l| l.ts == t0()));
    }

    #[tokio::test]
    async fn test_injury_of_other_athlete_is_ignored() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        seed(&pool, "a1", t0() - Duration::days(30)).await;
        save_injury(
            &pool,
            &InjuryRecord {
                id: "other".into(),
                athlete_id: "a2".into(),
                onset_date: t0() + Duration::days(1),
                body_part: None,
            },
        )
        .await
        .unwrap();

        build_injury_labels(&pool, "risk_v1", 14).await.unwrap();
        assert_eq!(label_of(&load_labels(&pool, 14).await.unwrap(), "a1").y, 0);
    }

    #[tokio::test]
    async fn test_no_features_no_labels() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        assert_eq!(build_injury_labels(&pool, "risk_v1", 14).await.unwrap(), 0);
    }
}
