//! Pipeline orchestration
//!
//! Each named pipeline is a straight sequence of steps. The first failing
//! step aborts the rest; a manifest written by an earlier successful run
//! keeps serving.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;

use mhd_common::config::PipelineConfig;
use mhd_common::time::now;

use super::dataset::{injury_training_frame, session_training_frame, TARGET};
use super::deid::deidentify;
use super::deploy::Deployer;
use super::loader::ModelLoader;
use super::normalize::normalize_frame;
use super::quality::{basic_schema_check, session_schema_check};
use super::synth::synthetic_frame;
use super::trainer::{Trainer, BASIC_TARGET};
use super::validator::validate_metrics;
use crate::artifacts::ArtifactStore;
use crate::error::{PipelineError, PipelineResult};
use crate::features::{build_injury_risk_features, build_session_features};
use crate::frame::Frame;
use crate::labeling::build_injury_labels;
use crate::models::{
    DeploymentManifest, JobResult, PipelineKind, RegistryPromotion, Stage, TrainParams, TrainingRun, UseCase,
};
use crate::storage::BlobStore;
use crate::tracking::{tracker_from_config, with_run, Tracker};

const DQ_ISSUES_FILE: &str = "dq_issues.txt";

/// Feature set built on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    Risk,
    Session,
}

impl FeatureSet {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "risk" => Some(FeatureSet::Risk),
            "session" => Some(FeatureSet::Session),
            _ => None,
        }
    }
}

/// Result of a synchronous CSV training from the raw container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobTraining {
    pub status: String,
    pub run: TrainingRun,
    pub data_sha256: String,
}

/// Every collaborator a pipeline needs, built once from configuration
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<PipelineConfig>,
    pub db: SqlitePool,
    pub tracker: Arc<dyn Tracker>,
    pub artifacts: ArtifactStore,
    pub deployer: Deployer,
    pub loader: ModelLoader,
    pub blobs: BlobStore,
}

impl PipelineContext {
    /// Context with the tracker selected by `[tracking] backend`
    pub fn new(config: PipelineConfig, db: SqlitePool) -> PipelineResult<Self> {
        let tracker = tracker_from_config(&config, db.clone())?;
        Ok(Self::with_tracker(config, db, tracker))
    }

    pub fn with_tracker(config: PipelineConfig, db: SqlitePool, tracker: Arc<dyn Tracker>) -> Self {
        let artifacts = ArtifactStore::new(config.artifacts_dir());
        let deployer = Deployer::new(config.registry_dir(), tracker.clone());
        let loader = ModelLoader::new(deployer.clone(), artifacts.clone());
        let blobs = BlobStore::from_config(&config);
        Self {
            config: Arc::new(config),
            db,
            tracker,
            artifacts,
            deployer,
            loader,
            blobs,
        }
    }

    /// Registered model consulted when a use case has no manifest
    pub fn registry_model_name(&self, use_case: UseCase) -> String {
        match use_case {
            UseCase::InjuryRisk => self.config.injury_model_name(),
            UseCase::SessionQuality => self.config.session_model_name(),
        }
    }

    fn trainer(&self) -> Trainer {
        Trainer::new(
            self.tracker.clone(),
            self.artifacts.clone(),
            self.config.pipeline.test_fraction,
            self.config.pipeline.forest_trees,
        )
    }

    fn seed(&self, params: &TrainParams) -> u64 {
        params.seed.unwrap_or(self.config.pipeline.random_seed)
    }

    /// Run a named pipeline
    pub async fn run(&self, kind: PipelineKind, params: &TrainParams) -> PipelineResult<JobResult> {
        match kind {
            PipelineKind::Generic => self.run_generic(params).await,
            PipelineKind::InjuryRisk => self.run_injury_risk(params).await,
            PipelineKind::SessionQuality => self.run_session_quality(params).await,
        }
    }

    /// synthesize → deidentify → basic gate → normalize → train → validate
    /// → registry promotion if valid → manifest
    pub async fn run_generic(&self, params: &TrainParams) -> PipelineResult<JobResult> {
        let rows = params.rows.unwrap_or(self.config.pipeline.synthetic_rows);
        let seed = self.seed(params);
        tracing::info!(rows, seed, "Generic pipeline started");

        let frame = deidentify(synthetic_frame(rows, seed)?)?;
        let report = basic_schema_check(&frame);
        if !report.ok {
            return self.record_dq_failure(report.issues).await;
        }
        let frame = normalize_frame(frame)?;

        let extra = BTreeMap::from([("rows".to_string(), rows.to_string())]);
        let run = self
            .trainer()
            .train_basic(&frame, BASIC_TARGET, "logreg", extra, seed)
            .await?;
        let promoted = self.promote_if_valid(&self.config.model_name(), &run).await?;
        let manifest = self.deploy(&run, UseCase::InjuryRisk, promoted.as_ref())?;

        tracing::info!(run_id = %run.run_id, "Generic pipeline finished");
        Ok(JobResult::Generic {
            run,
            promoted,
            manifest,
        })
    }

    /// build features → build labels → train → validate → registry
    /// promotion if valid → manifest
    pub async fn run_injury_risk(&self, params: &TrainParams) -> PipelineResult<JobResult> {
        let settings = &self.config.pipeline;
        let version = params
            .feature_version
            .clone()
            .unwrap_or_else(|| settings.risk_feature_version.clone());
        let horizon_days = params.horizon_days.unwrap_or(settings.horizon_days);
        let seed = self.seed(params);
        tracing::info!(version = %version, horizon_days, seed, "Injury-risk pipeline started");

        let features_built =
            build_injury_risk_features(&self.db, &version, &settings.lookback_days, now()).await?;
        let labels_built = build_injury_labels(&self.db, &version, horizon_days).await?;
        let frame = injury_training_frame(&self.db, &version, horizon_days).await?;

        let extra = BTreeMap::from([
            ("feature_version".to_string(), version.clone()),
            ("horizon_days".to_string(), horizon_days.to_string()),
        ]);
        let run = self.trainer().train_injury(&frame, TARGET, extra, seed).await?;
        let promoted = self
            .promote_if_valid(&self.config.injury_model_name(), &run)
            .await?;
        let manifest = self.deploy(&run, UseCase::InjuryRisk, promoted.as_ref())?;

        tracing::info!(run_id = %run.run_id, features_built, labels_built, "Injury-risk pipeline finished");
        Ok(JobResult::InjuryRisk {
            features_built,
            labels_built,
            run,
            promoted,
            manifest,
        })
    }

    /// session gate → train → manifest; no validation gate
    pub async fn run_session_quality(&self, params: &TrainParams) -> PipelineResult<JobResult> {
        let version = params
            .feature_version
            .clone()
            .unwrap_or_else(|| self.config.pipeline.session_feature_version.clone());
        let seed = self.seed(params);
        tracing::info!(version = %version, seed, "Session-quality pipeline started");

        let frame = session_training_frame(&self.db, &version).await?;
        let report = session_schema_check(&frame);
        if !report.ok {
            tracing::warn!(issues = ?report.issues, "Session training data failed quality gate");
        }
        report.into_result()?;

        let extra = BTreeMap::from([("feature_version".to_string(), version)]);
        let run = self.trainer().train_session(&frame, TARGET, extra, seed).await?;
        let manifest = self.deploy(&run, UseCase::SessionQuality, None)?;

        tracing::info!(run_id = %run.run_id, "Session-quality pipeline finished");
        Ok(JobResult::SessionQuality { run, manifest })
    }

    /// Train the generic model on a CSV object from the raw container
    pub async fn train_from_blob(&self, key: &str) -> PipelineResult<BlobTraining> {
        let bytes = self.blobs.get_raw(key)?;
        let data_sha256 = format!("{:x}", Sha256::digest(&bytes));
        let frame = Frame::from_csv(bytes.as_slice())?;
        tracing::info!(key, rows = frame.n_rows(), cols = frame.n_cols(), sha256 = %data_sha256, "Training from blob");

        let extra = BTreeMap::from([
            ("blob_key".to_string(), key.to_string()),
            ("data_sha256".to_string(), data_sha256.clone()),
        ]);
        let seed = self.config.pipeline.random_seed;
        let run = self
            .trainer()
            .train_basic(&frame, BASIC_TARGET, "logreg_blob", extra, seed)
            .await?;
        Ok(BlobTraining {
            status: "trained".to_string(),
            run,
            data_sha256,
        })
    }

    /// Build one feature set with configured settings
    pub async fn build_features(&self, set: FeatureSet) -> PipelineResult<usize> {
        let settings = &self.config.pipeline;
        match set {
            FeatureSet::Risk => {
                build_injury_risk_features(
                    &self.db,
                    &settings.risk_feature_version,
                    &settings.lookback_days,
                    now(),
                )
                .await
            }
            FeatureSet::Session => build_session_features(&self.db, &settings.session_feature_version).await,
        }
    }

    /// Label the configured risk feature version
    pub async fn build_labels(&self, horizon_days: Option<i64>) -> PipelineResult<usize> {
        let settings = &self.config.pipeline;
        build_injury_labels(
            &self.db,
            &settings.risk_feature_version,
            horizon_days.unwrap_or(settings.horizon_days),
        )
        .await
    }

    async fn promote_if_valid(&self, model_name: &str, run: &TrainingRun) -> PipelineResult<Option<RegistryPromotion>> {
        let threshold = self.config.pipeline.promote_min_auc;
        if !validate_metrics(&run.metrics, threshold) {
            tracing::info!(
                run_id = %run.run_id,
                val_auc = ?run.metrics.val_auc,
                threshold,
                "Below promotion threshold, registry left unchanged"
            );
            return Ok(None);
        }
        let promotion = self
            .deployer
            .promote_to_registry(model_name, run, Stage::Production)
            .await?;
        Ok(Some(promotion))
    }

    fn deploy(
        &self,
        run: &TrainingRun,
        use_case: UseCase,
        promoted: Option<&RegistryPromotion>,
    ) -> PipelineResult<DeploymentManifest> {
        let manifest = DeploymentManifest::for_run(run, use_case, promoted.map(|p| p.version.clone()));
        self.deployer.promote(&manifest, use_case)?;
        Ok(manifest)
    }

    /// Failed `dq_failed` run carrying the gate issues, then the gate error
    async fn record_dq_failure<T>(&self, issues: Vec<String>) -> PipelineResult<T> {
        tracing::warn!(issues = ?issues, "Data quality gate failed");
        let tracker = self.tracker.as_ref();
        let artifacts = &self.artifacts;
        with_run(tracker, "dq_failed", &BTreeMap::new(), |run_id| async move {
            let text = issues.join("\n");
            tracker
                .log_params(&run_id, &BTreeMap::from([("dq_failed".to_string(), "true".to_string())]))
                .await?;
            tracker.log_text(&run_id, DQ_ISSUES_FILE, &text).await?;
            artifacts.write_text(&run_id, DQ_ISSUES_FILE, &text)?;
            Err(PipelineError::DataQuality { issues })
        })
        .await
    }
}
