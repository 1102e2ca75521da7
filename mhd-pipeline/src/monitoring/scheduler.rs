//! Periodic monitoring loop run by `serve`

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use mhd_common::config::MonitoringConfig;
use mhd_common::time::now;

use super::{aggregate::aggregate_daily, drift::compute_daily_drift, precision::compute_precision_at_k};
use crate::error::PipelineResult;

/// Drift, yesterday's precision@k, then today's aggregates
pub async fn run_monitoring_once(
    pool: &SqlitePool,
    config: &MonitoringConfig,
    at: DateTime<Utc>,
) -> PipelineResult<()> {
    compute_daily_drift(pool, &config.drift_feature, config.drift_ref_days, config.drift_cur_days, at).await?;
    let yesterday = at.date_naive() - Duration::days(1);
    compute_precision_at_k(pool, yesterday, config.precision_k_pct).await?;
    aggregate_daily(pool, at).await?;
    Ok(())
}

/// Run the rollups every `interval_hours` until cancelled; a failed pass is
/// logged and retried on the next tick
pub async fn monitoring_loop(pool: SqlitePool, config: MonitoringConfig, cancel: CancellationToken) {
    let period = std::time::Duration::from_secs(config.interval_hours.max(1) * 3600);
    let mut ticker = tokio::time::interval(period);
    tracing::info!(interval_hours = config.interval_hours, "Monitoring loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = run_monitoring_once(&pool, &config, now()).await {
                    tracing::error!(error = %e, "Monitoring pass failed");
                }
            }
        }
    }
    tracing::info!("Monitoring loop stopped");
}
