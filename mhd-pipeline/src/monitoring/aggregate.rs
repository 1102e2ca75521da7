//! Daily dashboard rollups per use case

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use mhd_common::time::day_start;

use crate::db::{
    predictions::{load_api_metrics, load_predictions},
    rollups::{load_daily_metric, upsert_aggregate},
};
use crate::error::PipelineResult;
use crate::models::{ApiMetric, MetricAggregate, Prediction, RiskBuckets, UseCase};

/// Scores below this are low risk
pub const RISK_MEDIUM_FROM: f64 = 0.33;
/// Scores at or above this are high risk
pub const RISK_HIGH_FROM: f64 = 0.66;

/// Serving endpoint of a use case, as recorded in `api_metrics`
pub fn endpoint_for(use_case: UseCase) -> &'static str {
    match use_case {
        UseCase::InjuryRisk => "/predict/risk",
        UseCase::SessionQuality => "/predict/session_score",
    }
}

pub fn risk_buckets(scores: impl IntoIterator<Item = f64>) -> RiskBuckets {
    let mut buckets = RiskBuckets::default();
    for score in scores {
        if score < RISK_MEDIUM_FROM {
            buckets.low += 1;
        } else if score < RISK_HIGH_FROM {
            buckets.medium += 1;
        } else {
            buckets.high += 1;
        }
    }
    buckets
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn rollup(
    date: chrono::NaiveDate,
    use_case: UseCase,
    predictions: &[Prediction],
    samples: &[&ApiMetric],
) -> MetricAggregate {
    let error_rate = if samples.is_empty() {
        0.0
    } else {
        samples.iter().filter(|m| !m.ok).count() as f64 / samples.len() as f64
    };
    MetricAggregate {
        date,
        use_case,
        n_predictions: predictions.len() as i64,
        risk_buckets: match use_case {
            UseCase::InjuryRisk => risk_buckets(predictions.iter().map(|p| p.score)),
            UseCase::SessionQuality => RiskBuckets::default(),
        },
        score_avg: mean(predictions.iter().map(|p| p.score)),
        topk_k: None,
        topk_precision: None,
        latency_ms_avg: mean(samples.iter().map(|m| m.latency_ms)),
        error_rate,
    }
}

/// Roll up the UTC day of `now` for both use cases; the injury-risk row
/// also carries yesterday's precision@k when it was computed
pub async fn aggregate_daily(pool: &SqlitePool, now: DateTime<Utc>) -> PipelineResult<Vec<MetricAggregate>> {
    let start = day_start(&now);
    let end = start + Duration::days(1);
    let date = start.date_naive();
    let samples = load_api_metrics(pool, start, end).await?;
    let yesterday = load_daily_metric(pool, date - Duration::days(1)).await?;

    let mut rows = Vec::new();
    for use_case in [UseCase::InjuryRisk, UseCase::SessionQuality] {
        let predictions = load_predictions(pool, use_case, start, end).await?;
        let endpoint_samples: Vec<&ApiMetric> = samples
            .iter()
            .filter(|m| m.endpoint == endpoint_for(use_case))
            .collect();

        let mut agg = rollup(date, use_case, &predictions, &endpoint_samples);
        if use_case == UseCase::InjuryRisk {
            if let Some(metric) = &yesterday {
                agg.topk_k = Some(metric.k);
                agg.topk_precision = Some(metric.precision_at_k);
            }
        }
        upsert_aggregate(pool, &agg).await?;
        rows.push(agg);
    }

    tracing::info!(date = %date, "Daily aggregates written");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::predictions::{insert_api_metric, insert_predictions};
    use crate::db::rollups::{load_aggregate, upsert_daily_metric};
    use crate::models::{DailyModelMetric, FeatureMap};
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn test_bucket_edges() {
        let buckets = risk_buckets([0.0, 0.3299, 0.33, 0.6599, 0.66, 1.0]);
        assert_eq!(
            buckets,
            RiskBuckets {
                low: 2,
                medium: 2,
                high: 2
            }
        );
    }

    #[tokio::test]
    async fn test_aggregate_daily_rows() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 18, 0, 0).unwrap();
        let morning = Utc.with_ymd_and_hms(2024, 7, 10, 8, 0, 0).unwrap();

        let predictions: Vec<Prediction> = [0.1, 0.5, 0.9, 0.95]
            .into_iter()
            .map(|score| Prediction {
                id: Uuid::new_v4(),
                ts: morning,
                athlete_id: Some("a1".into()),
                use_case: UseCase::InjuryRisk,
                features: FeatureMap::new(),
                score,
                run_id: "r1".into(),
                model_version: None,
            })
            .collect();
        insert_predictions(&pool, &predictions).await.unwrap();
        for (latency_ms, ok) in [(10.0, true), (30.0, false)] {
            insert_api_metric(
                &pool,
                &ApiMetric {
                    ts: morning,
                    endpoint: "/predict/risk".into(),
                    latency_ms,
                    n: 2,
                    run_id: Some("r1".into()),
                    ok,
                },
            )
            .await
            .unwrap();
        }
        upsert_daily_metric(
            &pool,
            &DailyModelMetric {
                day: chrono::NaiveDate::from_ymd_opt(2024, 7, 9).unwrap(),
                n: 10,
                k_pct: 0.1,
                k: 1,
                precision_at_k: 1.0,
            },
        )
        .await
        .unwrap();

        let rows = aggregate_daily(&pool, now).await.unwrap();
        assert_eq!(rows.len(), 2);

        let risk = load_aggregate(&pool, now.date_naive(), UseCase::InjuryRisk)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(risk.n_predictions, 4);
        assert_eq!(risk.risk_buckets, RiskBuckets { low: 1, medium: 1, high: 2 });
        assert_eq!(risk.latency_ms_avg, Some(20.0));
        assert_eq!(risk.error_rate, 0.5);
        assert_eq!(risk.topk_precision, Some(1.0));

        let session = load_aggregate(&pool, now.date_naive(), UseCase::SessionQuality)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.n_predictions, 0);
        assert_eq!(session.score_avg, None);
        assert_eq!(session.error_rate, 0.0);
    }
}
