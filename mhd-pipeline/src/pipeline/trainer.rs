//! Model fitting with tracked runs
//!
//! Every fit happens inside a tracking run: parameters and validation
//! metrics are logged, the fitted model is written to the artifact store
//! and the run is closed as finished (or failed if anything errors).
//! Fitting itself runs on the blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use mhd_common::time::now;

use crate::artifacts::ArtifactStore;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::ml::{
    metrics::{average_precision, mean_absolute_error, roc_auc, spearman},
    split::{stratified_split, take, train_test_split, Split},
    Estimator, ForestParams, LogisticParams, LogisticRegression, ModelArtifact, RandomForestRegressor,
};
use crate::models::{run_model_uri, Metrics, TrainingRun, UseCase};
use crate::tracking::{with_run, Tracker};

/// Target column of the generic and CSV trainers
pub const BASIC_TARGET: &str = "target";

struct Fitted {
    estimator: Estimator,
    metrics: Metrics,
    params: BTreeMap<String, String>,
    n_train: usize,
    n_val: usize,
}

struct RunSpec<'a> {
    run_name: &'a str,
    tags: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    feature_names: Vec<String>,
    target: &'a str,
}

/// Design matrix and target of a frame, features = every other numeric column
fn xy(frame: &Frame, target: &str) -> PipelineResult<(Vec<String>, Vec<Vec<f64>>, Vec<f64>)> {
    if !frame.has_column(target) {
        return Err(PipelineError::MissingColumn(target.to_string()));
    }
    let features = frame.numeric_column_names(&[target]);
    if features.is_empty() {
        return Err(PipelineError::InsufficientData(
            "no numeric feature columns to train on".to_string(),
        ));
    }
    let x = frame.design_matrix(&features)?;
    let y = frame.numeric_column(target)?;
    Ok((features, x, y))
}

fn require_binary(y: &[f64], target: &str) -> PipelineResult<()> {
    match y.iter().find(|&&v| v != 0.0 && v != 1.0) {
        Some(v) => Err(PipelineError::InvalidData(format!(
            "target '{}' must be 0/1, found {}",
            target, v
        ))),
        None => Ok(()),
    }
}

fn fold(x: &[Vec<f64>], y: &[f64], split: &Split) -> (Vec<Vec<f64>>, Vec<f64>, Vec<Vec<f64>>, Vec<f64>) {
    (
        take(x, &split.train),
        take(y, &split.train),
        take(x, &split.test),
        take(y, &split.test),
    )
}

fn use_case_tags(use_case: Option<UseCase>) -> BTreeMap<String, String> {
    use_case
        .map(|u| BTreeMap::from([("use_case".to_string(), u.as_str().to_string())]))
        .unwrap_or_default()
}

pub struct Trainer {
    tracker: Arc<dyn Tracker>,
    artifacts: ArtifactStore,
    test_fraction: f64,
    forest_trees: usize,
}

impl Trainer {
    pub fn new(tracker: Arc<dyn Tracker>, artifacts: ArtifactStore, test_fraction: f64, forest_trees: usize) -> Self {
        Self {
            tracker,
            artifacts,
            test_fraction,
            forest_trees,
        }
    }

    async fn run_tracked<F>(&self, spec: RunSpec<'_>, fit: F) -> PipelineResult<TrainingRun>
    where
        F: FnOnce() -> PipelineResult<Fitted> + Send + 'static,
    {
        let RunSpec {
            run_name,
            tags,
            mut params,
            feature_names,
            target,
        } = spec;
        let tracker = self.tracker.as_ref();
        let artifacts = &self.artifacts;

        with_run(tracker, run_name, &tags, |run_id| async move {
            let fitted = tokio::task::spawn_blocking(fit)
                .await
                .map_err(|e| mhd_common::Error::Internal(format!("Training task failed: {}", e)))??;
            params.extend(fitted.params);
            params.insert("n_features".to_string(), feature_names.len().to_string());
            params.insert("features".to_string(), feature_names.join(","));
            params.insert("n_train".to_string(), fitted.n_train.to_string());
            params.insert("n_val".to_string(), fitted.n_val.to_string());

            tracker.log_params(&run_id, &params).await?;
            tracker.log_metrics(&run_id, &fitted.metrics.to_map()).await?;

            let artifact = ModelArtifact {
                run_id: run_id.clone(),
                feature_names,
                target: target.to_string(),
                estimator: fitted.estimator,
                created_at: now(),
            };
            artifacts.save_model(&artifact)?;
            let model_uri = run_model_uri(&run_id);
            tracker
                .set_tags(&run_id, &BTreeMap::from([("model_uri".to_string(), model_uri.clone())]))
                .await?;

            tracing::info!(
                run_id = %run_id,
                run_name,
                metrics = ?fitted.metrics,
                n_train = fitted.n_train,
                n_val = fitted.n_val,
                "Training run finished"
            );

            Ok(TrainingRun {
                run_id,
                run_name: run_name.to_string(),
                metrics: fitted.metrics,
                model_uri,
                params,
                n_train: fitted.n_train,
                n_val: fitted.n_val,
            })
        })
        .await
    }

    /// Logistic regression on a frame with a 0/1 target column
    pub async fn train_basic(
        &self,
        frame: &Frame,
        target: &str,
        run_name: &str,
        extra_params: BTreeMap<String, String>,
        seed: u64,
    ) -> PipelineResult<TrainingRun> {
        let (features, x, y) = xy(frame, target)?;
        require_binary(&y, target)?;
        let test_fraction = self.test_fraction;

        let mut params = extra_params;
        params.insert("random_seed".to_string(), seed.to_string());
        params.insert("test_fraction".to_string(), test_fraction.to_string());

        let spec = RunSpec {
            run_name,
            tags: BTreeMap::new(),
            params,
            feature_names: features,
            target,
        };
        self.run_tracked(spec, move || {
            let split = train_test_split(y.len(), test_fraction, seed)?;
            let (xtr, ytr, xte, yte) = fold(&x, &y, &split);
            let lr_params = LogisticParams {
                max_iter: 500,
                ..Default::default()
            };
            let model = LogisticRegression::fit(&xtr, &ytr, &lr_params)?;
            let auc = roc_auc(&yte, &model.predict_proba(&xte))?;
            Ok(Fitted {
                estimator: Estimator::LogisticRegression(model),
                metrics: Metrics {
                    val_auc: Some(auc),
                    ..Default::default()
                },
                params: BTreeMap::from([
                    ("model".to_string(), "logistic_regression".to_string()),
                    ("max_iter".to_string(), lr_params.max_iter.to_string()),
                ]),
                n_train: ytr.len(),
                n_val: yte.len(),
            })
        })
        .await
    }

    /// Class-balanced logistic regression on a stratified split
    pub async fn train_injury(
        &self,
        frame: &Frame,
        target: &str,
        extra_params: BTreeMap<String, String>,
        seed: u64,
    ) -> PipelineResult<TrainingRun> {
        let (features, x, y) = xy(frame, target)?;
        require_binary(&y, target)?;
        let test_fraction = self.test_fraction;

        let mut params = extra_params;
        params.insert("random_seed".to_string(), seed.to_string());
        params.insert("test_fraction".to_string(), test_fraction.to_string());

        let spec = RunSpec {
            run_name: "injury_risk",
            tags: use_case_tags(Some(UseCase::InjuryRisk)),
            params,
            feature_names: features,
            target,
        };
        self.run_tracked(spec, move || {
            let split = stratified_split(&y, test_fraction, seed)?;
            let (xtr, ytr, xte, yte) = fold(&x, &y, &split);
            let lr_params = LogisticParams {
                max_iter: 200,
                balanced: true,
                ..Default::default()
            };
            let model = LogisticRegression::fit(&xtr, &ytr, &lr_params)?;
            let proba = model.predict_proba(&xte);
            Ok(Fitted {
                metrics: Metrics {
                    val_auc: Some(roc_auc(&yte, &proba)?),
                    val_pr_auc: Some(average_precision(&yte, &proba)?),
                    ..Default::default()
                },
                estimator: Estimator::LogisticRegression(model),
                params: BTreeMap::from([
                    ("model".to_string(), "logistic_regression".to_string()),
                    ("max_iter".to_string(), lr_params.max_iter.to_string()),
                    ("class_weight".to_string(), "balanced".to_string()),
                ]),
                n_train: ytr.len(),
                n_val: yte.len(),
            })
        })
        .await
    }

    /// Random-forest regression of the coach rating
    pub async fn train_session(
        &self,
        frame: &Frame,
        target: &str,
        extra_params: BTreeMap<String, String>,
        seed: u64,
    ) -> PipelineResult<TrainingRun> {
        let (features, x, y) = xy(frame, target)?;
        let test_fraction = self.test_fraction;
        let forest_params = ForestParams {
            n_trees: self.forest_trees,
            seed,
            ..Default::default()
        };

        let mut params = extra_params;
        params.insert("random_seed".to_string(), seed.to_string());
        params.insert("test_fraction".to_string(), test_fraction.to_string());

        let spec = RunSpec {
            run_name: "sessions_quality",
            tags: use_case_tags(Some(UseCase::SessionQuality)),
            params,
            feature_names: features,
            target,
        };
        self.run_tracked(spec, move || {
            let split = train_test_split(y.len(), test_fraction, seed)?;
            let (xtr, ytr, xte, yte) = fold(&x, &y, &split);
            let model = RandomForestRegressor::fit(&xtr, &ytr, &forest_params)?;
            let pred = model.predict(&xte);
            let rho = spearman(&yte, &pred);
            if rho.is_none() {
                tracing::warn!("Spearman correlation undefined on a constant validation column");
            }
            Ok(Fitted {
                estimator: Estimator::RandomForestRegressor(model),
                metrics: Metrics {
                    val_mae: Some(mean_absolute_error(&yte, &pred)),
                    val_spearman: rho,
                    ..Default::default()
                },
                params: BTreeMap::from([
                    ("model".to_string(), "random_forest_regressor".to_string()),
                    ("n_estimators".to_string(), forest_params.n_trees.to_string()),
                    ("max_depth".to_string(), forest_params.max_depth.to_string()),
                ]),
                n_train: ytr.len(),
                n_val: yte.len(),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Cell;
    use crate::pipeline::synth::synthetic_frame;
    use crate::tracking::{LocalTracker, RunStatus};
    use tempfile::TempDir;

    async fn trainer(dir: &TempDir) -> (Trainer, Arc<LocalTracker>, sqlx::SqlitePool) {
        let db = mhd_common::db::init_in_memory().await.unwrap();
        let tracker = Arc::new(LocalTracker::new(db.clone(), "test"));
        let trainer = Trainer::new(tracker.clone(), ArtifactStore::new(dir.path()), 0.2, 10);
        (trainer, tracker, db)
    }

    #[tokio::test]
    async fn test_basic_run_is_logged_and_auc_bounded() {
        let dir = TempDir::new().unwrap();
        let (trainer, tracker, _) = trainer(&dir).await;
        let frame = synthetic_frame(300, 42).unwrap();

        let run = trainer
            .train_basic(&frame, BASIC_TARGET, "logreg", BTreeMap::new(), 42)
            .await
            .unwrap();
        let auc = run.metrics.val_auc.unwrap();
        assert!((0.0..=1.0).contains(&auc));
        assert_eq!(run.model_uri, format!("runs:/{}/model", run.run_id));
        assert_eq!(run.n_val, 60);

        let record = tracker.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Finished);
        assert_eq!(record.metrics["val_auc"], auc);
        assert_eq!(record.params["features"], "age,bp,hr");
        assert!(dir.path().join(&run.run_id).join("model.json").exists());
    }

    #[tokio::test]
    async fn test_fit_leaves_runtime_responsive() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::{Duration, Instant};

        let dir = TempDir::new().unwrap();
        let db = mhd_common::db::init_in_memory().await.unwrap();
        let tracker = Arc::new(LocalTracker::new(db, "test"));
        let trainer = Trainer::new(tracker, ArtifactStore::new(dir.path()), 0.2, 100);
        let n = 3000;
        let frame = Frame::from_columns(vec![
            ("rpe".to_string(), (0..n).map(|i| Cell::Num((i % 10) as f64)).collect()),
            ("sets".to_string(), (0..n).map(|i| Cell::Num((i * 7 % 13) as f64)).collect()),
            ("y".to_string(), (0..n).map(|i| Cell::Num(((i * 31) % 97) as f64 / 10.0)).collect()),
        ])
        .unwrap();

        // Single-threaded runtime: the ticker only advances if the fit yields the thread
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let started = Instant::now();
        trainer.train_session(&frame, "y", BTreeMap::new(), 7).await.unwrap();
        let elapsed_ms = started.elapsed().as_millis() as usize;
        ticker.abort();

        let ticks = ticks.load(Ordering::Relaxed);
        assert!(
            ticks >= elapsed_ms / 10,
            "ticker advanced {} times during a {} ms fit",
            ticks,
            elapsed_ms
        );
    }

    #[tokio::test]
    async fn test_missing_target_fails_before_run() {
        let dir = TempDir::new().unwrap();
        let (trainer, _, _) = trainer(&dir).await;
        let frame = Frame::from_csv("age,bp\n1,2\n3,4\n".as_bytes()).unwrap();
        assert!(matches!(
            trainer.train_basic(&frame, BASIC_TARGET, "logreg", BTreeMap::new(), 1).await,
            Err(PipelineError::MissingColumn(_))
        ));
    }

    #[tokio::test]
    async fn test_single_class_marks_run_failed() {
        let dir = TempDir::new().unwrap();
        let (trainer, _, db) = trainer(&dir).await;
        let frame = Frame::from_columns(vec![
            ("age".to_string(), (0..10).map(|i| Cell::Num(i as f64)).collect()),
            ("target".to_string(), vec![Cell::Num(0.0); 10]),
        ])
        .unwrap();

        let err = trainer
            .train_basic(&frame, BASIC_TARGET, "logreg", BTreeMap::new(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateTarget(_)));

        let statuses: Vec<String> = sqlx::query_scalar("SELECT status FROM tracking_runs")
            .fetch_all(&db)
            .await
            .unwrap();
        assert_eq!(statuses, vec!["FAILED".to_string()]);
    }

    #[tokio::test]
    async fn test_session_regressor_metrics() {
        let dir = TempDir::new().unwrap();
        let (trainer, _, _) = trainer(&dir).await;
        let frame = Frame::from_columns(vec![
            ("rpe".to_string(), (0..40).map(|i| Cell::Num((i % 10) as f64)).collect()),
            ("y".to_string(), (0..40).map(|i| Cell::Num(1.0 + (i % 10) as f64 * 0.4)).collect()),
        ])
        .unwrap();

        let run = trainer.train_session(&frame, "y", BTreeMap::new(), 42).await.unwrap();
        assert!(run.metrics.val_mae.unwrap() < 0.5);
        assert!(run.metrics.val_auc.is_none());
    }
}
