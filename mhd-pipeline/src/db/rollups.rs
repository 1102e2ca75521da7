//! Monitoring rollup tables: drift, daily model metrics, dashboard aggregates

use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use mhd_common::time::{format_ts, now, parse_date, parse_ts};
use mhd_common::Result;

use crate::models::{DailyModelMetric, DriftMetric, MetricAggregate, RiskBuckets, UseCase};

/// Append one drift measurement
pub async fn insert_drift(pool: &SqlitePool, drift: &DriftMetric) -> Result<()> {
    sqlx::query("INSERT INTO drift_metrics (ts, feature, psi) VALUES (?, ?, ?)")
        .bind(format_ts(&drift.ts))
        .bind(&drift.feature)
        .bind(drift.psi)
        .execute(pool)
        .await?;
    Ok(())
}

/// Latest drift measurements, newest first
pub async fn recent_drift(pool: &SqlitePool, limit: i64) -> Result<Vec<DriftMetric>> {
    let rows = sqlx::query(
        "SELECT ts, feature, psi FROM drift_metrics ORDER BY ts DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let ts: String = row.get("ts");
            Ok(DriftMetric {
                ts: parse_ts(&ts)?,
                feature: row.get("feature"),
                psi: row.get("psi"),
            })
        })
        .collect()
}

/// Insert or overwrite the precision@k row of a day
pub async fn upsert_daily_metric(pool: &SqlitePool, metric: &DailyModelMetric) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO model_daily_metrics (day, n, k_pct, k, precision_at_k, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(day) DO UPDATE SET
            n = excluded.n,
            k_pct = excluded.k_pct,
            k = excluded.k,
            precision_at_k = excluded.precision_at_k,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(metric.day.to_string())
    .bind(metric.n)
    .bind(metric.k_pct)
    .bind(metric.k)
    .bind(metric.precision_at_k)
    .bind(format_ts(&now()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_daily_metric(pool: &SqlitePool, day: NaiveDate) -> Result<Option<DailyModelMetric>> {
    let row = sqlx::query(
        "SELECT day, n, k_pct, k, precision_at_k FROM model_daily_metrics WHERE day = ?",
    )
    .bind(day.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let day: String = row.get("day");
        Ok(DailyModelMetric {
            day: parse_date(&day)?,
            n: row.get("n"),
            k_pct: row.get("k_pct"),
            k: row.get("k"),
            precision_at_k: row.get("precision_at_k"),
        })
    })
    .transpose()
}

/// Insert or overwrite the dashboard rollup of (date, use case)
pub async fn upsert_aggregate(pool: &SqlitePool, agg: &MetricAggregate) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO metric_aggregates (
            date, use_case, n_predictions, risk_low, risk_medium, risk_high,
            score_avg, topk_k, topk_precision, latency_ms_avg, error_rate, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(date, use_case) DO UPDATE SET
            n_predictions = excluded.n_predictions,
            risk_low = excluded.risk_low,
            risk_medium = excluded.risk_medium,
            risk_high = excluded.risk_high,
            score_avg = excluded.score_avg,
            topk_k = excluded.topk_k,
            topk_precision = excluded.topk_precision,
            latency_ms_avg = excluded.latency_ms_avg,
            error_rate = excluded.error_rate,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(agg.date.to_string())
    .bind(agg.use_case.as_str())
    .bind(agg.n_predictions)
    .bind(agg.risk_buckets.low)
    .bind(agg.risk_buckets.medium)
    .bind(agg.risk_buckets.high)
    .bind(agg.score_avg)
    .bind(agg.topk_k)
    .bind(agg.topk_precision)
    .bind(agg.latency_ms_avg)
    .bind(agg.error_rate)
    .bind(format_ts(&now()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_aggregate(
    pool: &SqlitePool,
    date: NaiveDate,
    use_case: UseCase,
) -> Result<Option<MetricAggregate>> {
    let row = sqlx::query(
        r#"
        SELECT n_predictions, risk_low, risk_medium, risk_high, score_avg,
               topk_k, topk_precision, latency_ms_avg, error_rate
        FROM metric_aggregates
        WHERE date = ? AND use_case = ?
        "#,
    )
    .bind(date.to_string())
    .bind(use_case.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| MetricAggregate {
        date,
        use_case,
        n_predictions: row.get("n_predictions"),
        risk_buckets: RiskBuckets {
            low: row.get("risk_low"),
            medium: row.get("risk_medium"),
            high: row.get("risk_high"),
        },
        score_avg: row.get("score_avg"),
        topk_k: row.get("topk_k"),
        topk_precision: row.get("topk_precision"),
        latency_ms_avg: row.get("latency_ms_avg"),
        error_rate: row.get("error_rate"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_aggregate_upsert_replaces_row() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let mut agg = MetricAggregate {
            date,
            use_case: UseCase::InjuryRisk,
            n_predictions: 3,
            risk_buckets: RiskBuckets { low: 1, medium: 1, high: 1 },
            score_avg: Some(0.5),
            topk_k: None,
            topk_precision: None,
            latency_ms_avg: Some(2.0),
            error_rate: 0.0,
        };
        upsert_aggregate(&pool, &agg).await.unwrap();
        agg.risk_buckets.high = 5;
        upsert_aggregate(&pool, &agg).await.unwrap();

        let loaded = load_aggregate(&pool, date, UseCase::InjuryRisk).await.unwrap();
        assert_eq!(loaded, Some(agg));
        assert!(load_aggregate(&pool, date, UseCase::SessionQuality)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_daily_metric_round_trip() {
        let pool = mhd_common::db::init_in_memory().await.unwrap();
        let metric = DailyModelMetric {
            day: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            n: 20,
            k_pct: 0.1,
            k: 2,
            precision_at_k: 0.5,
        };
        upsert_daily_metric(&pool, &metric).await.unwrap();
        assert_eq!(load_daily_metric(&pool, metric.day).await.unwrap(), Some(metric));
    }
}
