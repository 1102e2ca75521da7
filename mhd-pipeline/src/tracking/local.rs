//! SQLite-backed tracking server and registry

use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use mhd_common::time::{format_ts, now, parse_ts};

use super::{RunRecord, RunStatus, Tracker};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ModelVersion, Stage};

/// Runs in `tracking_runs`, registry in `registered_models`/`model_versions`
#[derive(Clone)]
pub struct LocalTracker {
    db: SqlitePool,
    experiment: String,
}

impl LocalTracker {
    pub fn new(db: SqlitePool, experiment: &str) -> Self {
        Self {
            db,
            experiment: experiment.to_string(),
        }
    }

    /// Read-modify-write of one JSON map column of a run
    async fn merge_json<V>(&self, run_id: &str, column: &str, values: &BTreeMap<String, V>) -> PipelineResult<()>
    where
        V: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync,
    {
        let mut tx = self.db.begin().await?;
        let current: Option<String> =
            sqlx::query_scalar(&format!("SELECT {} FROM tracking_runs WHERE run_id = ?", column))
                .bind(run_id)
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.ok_or_else(|| PipelineError::Tracking(format!("Run not found: {}", run_id)))?;

        let mut merged: BTreeMap<String, V> = serde_json::from_str(&current)?;
        merged.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));

        sqlx::query(&format!("UPDATE tracking_runs SET {} = ? WHERE run_id = ?", column))
            .bind(serde_json::to_string(&merged)?)
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn version_from_row(row: &SqliteRow) -> PipelineResult<ModelVersion> {
    let stage: String = row.get("stage");
    Ok(ModelVersion {
        name: row.get("name"),
        version: row.get::<i64, _>("version").to_string(),
        run_id: row.get("run_id"),
        source: row.get("source"),
        stage: Stage::parse(&stage)
            .ok_or_else(|| PipelineError::Registry(format!("Unknown stage: {}", stage)))?,
    })
}

fn parse_version(version: &str) -> PipelineResult<i64> {
    version
        .parse()
        .map_err(|_| PipelineError::Registry(format!("Invalid model version: {}", version)))
}

#[async_trait]
impl Tracker for LocalTracker {
    async fn start_run(&self, run_name: &str, tags: &BTreeMap<String, String>) -> PipelineResult<String> {
        let run_id = Uuid::new_v4().simple().to_string();
        sqlx::query(
            r#"
            INSERT INTO tracking_runs (run_id, experiment, run_name, status, tags, started_at)
            VALUES (?, ?, ?, 'RUNNING', ?, ?)
            "#,
        )
        .bind(&run_id)
        .bind(&self.experiment)
        .bind(run_name)
        .bind(serde_json::to_string(tags)?)
        .bind(format_ts(&now()))
        .execute(&self.db)
        .await?;

        tracing::debug!(run_id = %run_id, run_name, "Started tracking run");
        Ok(run_id)
    }

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> PipelineResult<()> {
        self.merge_json(run_id, "params", params).await
    }

    async fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> PipelineResult<()> {
        self.merge_json(run_id, "metrics", metrics).await
    }

    async fn set_tags(&self, run_id: &str, tags: &BTreeMap<String, String>) -> PipelineResult<()> {
        self.merge_json(run_id, "tags", tags).await
    }

    async fn log_text(&self, run_id: &str, name: &str, text: &str) -> PipelineResult<()> {
        let texts = BTreeMap::from([(name.to_string(), text.to_string())]);
        self.merge_json(run_id, "texts", &texts).await
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> PipelineResult<()> {
        let result = sqlx::query("UPDATE tracking_runs SET status = ?, ended_at = ? WHERE run_id = ?")
            .bind(status.as_str())
            .bind(format_ts(&now()))
            .bind(run_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::Tracking(format!("Run not found: {}", run_id)));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> PipelineResult<Option<RunRecord>> {
        let row = sqlx::query(
            r#"
            SELECT run_id, run_name, status, params, metrics, tags, started_at, ended_at
            FROM tracking_runs
            WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.get("status");
        let params: String = row.get("params");
        let metrics: String = row.get("metrics");
        let tags: String = row.get("tags");
        let started_at: String = row.get("started_at");
        let ended_at: Option<String> = row.get("ended_at");

        Ok(Some(RunRecord {
            run_id: row.get("run_id"),
            run_name: row.get("run_name"),
            status: RunStatus::parse(&status)
                .ok_or_else(|| PipelineError::Tracking(format!("Unknown run status: {}", status)))?,
            params: serde_json::from_str(&params)?,
            metrics: serde_json::from_str(&metrics)?,
            tags: serde_json::from_str(&tags)?,
            started_at: Some(parse_ts(&started_at)?),
            ended_at: ended_at.as_deref().map(parse_ts).transpose()?,
        }))
    }

    async fn ensure_registered_model(&self, name: &str) -> PipelineResult<()> {
        sqlx::query("INSERT INTO registered_models (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .bind(format_ts(&now()))
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn create_model_version(&self, name: &str, source: &str, run_id: &str) -> PipelineResult<ModelVersion> {
        let mut tx = self.db.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT name FROM registered_models WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(PipelineError::Registry(format!("Registered model not found: {}", name)));
        }

        let next: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) + 1 FROM model_versions WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
        let ts = format_ts(&now());
        sqlx::query(
            r#"
            INSERT INTO model_versions (name, version, run_id, source, stage, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'None', ?, ?)
            "#,
        )
        .bind(name)
        .bind(next)
        .bind(run_id)
        .bind(source)
        .bind(&ts)
        .bind(&ts)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(ModelVersion {
            name: name.to_string(),
            version: next.to_string(),
            run_id: run_id.to_string(),
            source: source.to_string(),
            stage: Stage::None,
        })
    }

    async fn transition_stage(
        &self,
        name: &str,
        version: &str,
        stage: Stage,
        archive_existing: bool,
    ) -> PipelineResult<ModelVersion> {
        let version_num = parse_version(version)?;
        let ts = format_ts(&now());
        let mut tx = self.db.begin().await?;

        if archive_existing && matches!(stage, Stage::Staging | Stage::Production) {
            sqlx::query(
                r#"
                UPDATE model_versions SET stage = 'Archived', updated_at = ?
                WHERE name = ? AND stage = ? AND version != ?
                "#,
            )
            .bind(&ts)
            .bind(name)
            .bind(stage.as_str())
            .bind(version_num)
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            "UPDATE model_versions SET stage = ?, updated_at = ? WHERE name = ? AND version = ?",
        )
        .bind(stage.as_str())
        .bind(&ts)
        .bind(name)
        .bind(version_num)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(PipelineError::Registry(format!(
                "Model version not found: {} v{}",
                name, version
            )));
        }

        let row = sqlx::query(
            "SELECT name, version, run_id, source, stage FROM model_versions WHERE name = ? AND version = ?",
        )
        .bind(name)
        .bind(version_num)
        .fetch_one(&mut *tx)
        .await?;
        let mv = version_from_row(&row)?;
        tx.commit().await?;
        Ok(mv)
    }

    async fn latest_version(&self, name: &str, stage: Stage) -> PipelineResult<Option<ModelVersion>> {
        let row = sqlx::query(
            r#"
            SELECT name, version, run_id, source, stage
            FROM model_versions
            WHERE name = ? AND stage = ?
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(stage.as_str())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(version_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tracker() -> LocalTracker {
        LocalTracker::new(mhd_common::db::init_in_memory().await.unwrap(), "test")
    }

    #[tokio::test]
    async fn test_run_lifecycle_merges_logged_values() {
        let tracker = tracker().await;
        let run_id = tracker
            .start_run("logreg", &BTreeMap::from([("use_case".into(), "injury_risk".into())]))
            .await
            .unwrap();

        tracker
            .log_params(&run_id, &BTreeMap::from([("max_iter".into(), "500".into())]))
            .await
            .unwrap();
        tracker
            .log_metrics(&run_id, &BTreeMap::from([("val_auc".into(), 0.8)]))
            .await
            .unwrap();
        tracker
            .log_metrics(&run_id, &BTreeMap::from([("val_pr_auc".into(), 0.4)]))
            .await
            .unwrap();
        tracker.end_run(&run_id, RunStatus::Finished).await.unwrap();

        let run = tracker.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Finished);
        assert_eq!(run.metrics.len(), 2);
        assert_eq!(run.params["max_iter"], "500");
        assert_eq!(run.tags["use_case"], "injury_risk");
        assert!(run.ended_at.is_some());
        assert!(tracker.get_run("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logged_metrics_keep_every_bit() {
        let tracker = tracker().await;
        let run_id = tracker.start_run("logreg", &BTreeMap::new()).await.unwrap();
        let auc = 0.9649595687331537_f64;
        let mae = 0.1 + 0.2;

        tracker
            .log_metrics(&run_id, &BTreeMap::from([("val_auc".into(), auc)]))
            .await
            .unwrap();
        // Second merge re-parses and re-writes the stored values
        tracker
            .log_metrics(&run_id, &BTreeMap::from([("val_mae".into(), mae)]))
            .await
            .unwrap();

        let run = tracker.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.metrics["val_auc"].to_bits(), auc.to_bits());
        assert_eq!(run.metrics["val_mae"].to_bits(), mae.to_bits());
    }

    #[tokio::test]
    async fn test_logging_to_unknown_run_fails() {
        let tracker = tracker().await;
        let err = tracker
            .log_metrics("nope", &BTreeMap::from([("val_auc".into(), 0.8)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Tracking(_)));
    }

    #[tokio::test]
    async fn test_transition_archives_previous_production() {
        let tracker = tracker().await;
        tracker.ensure_registered_model("mhd_logreg").await.unwrap();
        tracker.ensure_registered_model("mhd_logreg").await.unwrap();

        let v1 = tracker
            .create_model_version("mhd_logreg", "runs:/r1/model", "r1")
            .await
            .unwrap();
        let v2 = tracker
            .create_model_version("mhd_logreg", "runs:/r2/model", "r2")
            .await
            .unwrap();
        assert_eq!((v1.version.as_str(), v2.version.as_str()), ("1", "2"));

        tracker
            .transition_stage("mhd_logreg", &v1.version, Stage::Production, true)
            .await
            .unwrap();
        let promoted = tracker
            .transition_stage("mhd_logreg", &v2.version, Stage::Production, true)
            .await
            .unwrap();
        assert_eq!(promoted.stage, Stage::Production);

        let current = tracker
            .latest_version("mhd_logreg", Stage::Production)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.run_id, "r2");
        let archived = tracker
            .latest_version("mhd_logreg", Stage::Archived)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(archived.run_id, "r1");
    }

    #[tokio::test]
    async fn test_version_requires_registered_model() {
        let tracker = tracker().await;
        let err = tracker
            .create_model_version("ghost", "runs:/r1/model", "r1")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Registry(_)));
    }
}
