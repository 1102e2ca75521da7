//! Precision@k of one day's injury-risk predictions

use chrono::{Duration, NaiveDate};
use sqlx::SqlitePool;
use std::collections::HashSet;

use mhd_common::time::date_start;

use crate::db::{predictions::load_predictions, records::load_injuries, rollups::upsert_daily_metric};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{DailyModelMetric, UseCase};

/// Days after the prediction day in which an onset counts as a hit
const OUTCOME_DAYS: i64 = 7;

/// Rank `day`'s predictions by score; a prediction is a hit when its athlete
/// has an injury onset in `[day+1, day+8)`. `None` when nothing was served.
pub async fn compute_precision_at_k(
    pool: &SqlitePool,
    day: NaiveDate,
    k_pct: f64,
) -> PipelineResult<Option<DailyModelMetric>> {
    if !(k_pct > 0.0 && k_pct <= 1.0) {
        return Err(PipelineError::InvalidData(format!("k_pct must be in (0, 1], got {}", k_pct)));
    }
    let start = date_start(day);
    let next_day = start + Duration::days(1);

    let mut predictions = load_predictions(pool, UseCase::InjuryRisk, start, next_day).await?;
    if predictions.is_empty() {
        return Ok(None);
    }

    let injured: HashSet<String> = load_injuries(pool, Some(next_day), Some(next_day + Duration::days(OUTCOME_DAYS)))
        .await?
        .into_iter()
        .map(|i| i.athlete_id)
        .collect();

    let n = predictions.len();
    let k = ((n as f64 * k_pct).ceil() as usize).clamp(1, n);
    predictions.sort_by(|a, b| b.score.total_cmp(&a.score));
    let hits = predictions[..k]
        .iter()
        .filter(|p| p.athlete_id.as_ref().is_some_and(|a| injured.contains(a)))
        .count();

    let metric = DailyModelMetric {
        day,
        n: n as i64,
        k_pct,
        k: k as i64,
        precision_at_k: hits as f64 / k as f64,
    };
    upsert_daily_metric(pool, &metric).await?;
    tracing::info!(day = %day, n, k, precision_at_k = metric.precision_at_k, "Precision@k computed");
    Ok(Some(metric))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::predictions::insert_predictions;
    use crate::db::records::save_injury;
    use crate::db::rollups::load_daily_metric;
    use crate::models::{FeatureMap, InjuryRecord, Prediction};
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    fn prediction(athlete: &str, ts: DateTime<Utc>, score: f64) -> Prediction {
        Prediction {
            id: Uuid::new_v4(),
            ts,
            athlete_id: Some(athlete.to_string()),
            use_case: UseCase::InjuryRisk,
            features: FeatureMap::new(),
            score,
            run_id: "r1".to_string(),
            model_version: Some("1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_precision_at_k_window() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 7, 10).unwrap();
        let noon = date_start(day) + Duration::hours(12);

        let rows: Vec<Prediction> = (0..20)
            .map(|i| prediction(&format!("a{}", i), noon, i as f64 / 20.0))
            .collect();
        insert_predictions(&pool, &rows).await.unwrap();

        // a19 (top score) injured on day+7, a18 on day+8 (outside), a17 same day (outside)
        for (id, athlete, offset) in [("i1", "a19", 7), ("i2", "a18", 8), ("i3", "a17", 0)] {
            save_injury(
                &pool,
                &InjuryRecord {
                    id: id.to_string(),
                    athlete_id: athlete.to_string(),
                    onset_date: date_start(day) + Duration::days(offset),
                    body_part: None,
                },
            )
            .await
            .unwrap();
        }

        let metric = compute_precision_at_k(&pool, day, 0.10).await.unwrap().unwrap();
        assert_eq!(metric.n, 20);
        assert_eq!(metric.k, 2);
        assert!((metric.precision_at_k - 0.5).abs() < 1e-12);
        assert_eq!(load_daily_metric(&pool, day).await.unwrap(), Some(metric));
    }

    #[tokio::test]
    async fn test_no_predictions_is_none() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 7, 10).unwrap();
        assert!(compute_precision_at_k(&pool, day, 0.1).await.unwrap().is_none());
        assert!(compute_precision_at_k(&pool, day, 0.0).await.is_err());
    }
}
