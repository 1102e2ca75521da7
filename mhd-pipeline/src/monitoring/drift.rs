//! Feature drift between served inputs of a reference and a current window

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::db::{predictions::load_predictions, rollups::insert_drift};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{DriftMetric, Prediction, UseCase};

const PSI_BINS: usize = 10;
const EMPTY_BIN_FLOOR: f64 = 1e-6;

/// Bin shares over equal-width edges of `[lo, hi]`; values outside are not
/// counted but still weigh in the denominator
fn bin_shares(values: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    let width = (hi - lo) / PSI_BINS as f64;
    let mut counts = vec![0usize; PSI_BINS];
    for &v in values {
        if v < lo || v > hi {
            continue;
        }
        let bin = (((v - lo) / width) as usize).min(PSI_BINS - 1);
        counts[bin] += 1;
    }
    counts
        .into_iter()
        .map(|c| c as f64 / values.len() as f64)
        .map(|share| if share == 0.0 { EMPTY_BIN_FLOOR } else { share })
        .collect()
}

/// Population stability index of `actual` against `expected`
pub fn psi(expected: &[f64], actual: &[f64]) -> PipelineResult<f64> {
    if expected.is_empty() || actual.is_empty() {
        return Err(PipelineError::InsufficientData(
            "PSI needs values in both windows".to_string(),
        ));
    }
    let mut lo = expected.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = expected.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if lo == hi {
        let pad = if lo == 0.0 { 0.001 } else { lo.abs() * 0.001 };
        lo -= pad;
        hi += pad;
    }

    let e = bin_shares(expected, lo, hi);
    let a = bin_shares(actual, lo, hi);
    Ok(e.iter().zip(&a).map(|(e, a)| (a - e) * (a / e).ln()).sum())
}

fn feature_values(predictions: &[Prediction], feature: &str) -> Vec<f64> {
    predictions
        .iter()
        .filter_map(|p| p.features.get(feature).copied())
        .collect()
}

async fn served_values(
    pool: &SqlitePool,
    feature: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> PipelineResult<Vec<f64>> {
    let mut values = Vec::new();
    for use_case in [UseCase::InjuryRisk, UseCase::SessionQuality] {
        let predictions = load_predictions(pool, use_case, start, end).await?;
        values.extend(feature_values(&predictions, feature));
    }
    Ok(values)
}

/// PSI of `feature` over served inputs: reference `[now-ref-cur, now-cur)`
/// against current `[now-cur, now)`. Appends a drift row; `None` when either
/// window never saw the feature.
pub async fn compute_daily_drift(
    pool: &SqlitePool,
    feature: &str,
    ref_days: i64,
    cur_days: i64,
    now: DateTime<Utc>,
) -> PipelineResult<Option<f64>> {
    if ref_days <= 0 || cur_days <= 0 {
        return Err(PipelineError::InvalidData(format!(
            "drift windows must be positive, got ref {} / cur {}",
            ref_days, cur_days
        )));
    }
    let cur_start = now - Duration::days(cur_days);
    let ref_start = cur_start - Duration::days(ref_days);

    let reference = served_values(pool, feature, ref_start, cur_start).await?;
    let current = served_values(pool, feature, cur_start, now).await?;
    if reference.is_empty() || current.is_empty() {
        tracing::info!(
            feature,
            reference = reference.len(),
            current = current.len(),
            "Not enough served values for drift"
        );
        return Ok(None);
    }

    let score = psi(&reference, &current)?;
    insert_drift(
        pool,
        &DriftMetric {
            ts: now,
            feature: feature.to_string(),
            psi: score,
        },
    )
    .await?;
    tracing::info!(feature, psi = score, "Drift computed");
    Ok(Some(score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::predictions::insert_predictions;
    use crate::db::rollups::recent_drift;
    use crate::models::FeatureMap;
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn test_identical_distributions_have_zero_psi() {
        let values: Vec<f64> = (0..100).map(|i| i as f64 / 10.0).collect();
        assert!(psi(&values, &values).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_shifted_distribution_has_positive_psi() {
        let reference: Vec<f64> = (0..100).map(|i| (i % 10) as f64).collect();
        let current: Vec<f64> = (0..100).map(|i| 5.0 + (i % 5) as f64).collect();
        assert!(psi(&reference, &current).unwrap() > 0.5);
    }

    #[test]
    fn test_constant_reference_is_finite() {
        let score = psi(&[3.0; 20], &[3.0, 3.0, 9.0]).unwrap();
        assert!(score.is_finite());
        assert!(score > 0.0);
    }

    fn served(ts: DateTime<Utc>, rpe: f64) -> Prediction {
        Prediction {
            id: Uuid::new_v4(),
            ts,
            athlete_id: None,
            use_case: UseCase::SessionQuality,
            features: FeatureMap::from([("rpe".to_string(), rpe)]),
            score: 3.0,
            run_id: "r1".to_string(),
            model_version: None,
        }
    }

    #[tokio::test]
    async fn test_drift_windows() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 12, 0, 0).unwrap();

        assert_eq!(compute_daily_drift(&pool, "rpe", 7, 1, now).await.unwrap(), None);

        let mut rows: Vec<Prediction> = (0..20)
            .map(|i| served(now - Duration::days(3) + Duration::minutes(i), (i % 10) as f64))
            .collect();
        rows.extend((0..20).map(|i| served(now - Duration::hours(2) + Duration::minutes(i), 8.0)));
        // outside both windows
        rows.push(served(now - Duration::days(30), 0.0));
        insert_predictions(&pool, &rows).await.unwrap();

        let score = compute_daily_drift(&pool, "rpe", 7, 1, now).await.unwrap().unwrap();
        assert!(score > 0.1);
        let stored = recent_drift(&pool, 5).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].feature, "rpe");

        assert_eq!(compute_daily_drift(&pool, "sleep", 7, 1, now).await.unwrap(), None);
    }
}
