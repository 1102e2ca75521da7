//! Deployment: manifest promotion and registry stage transitions
//!
//! The manifest is the serving pointer. It is replaced atomically so a
//! reader sees either the previous deployment or the new one. Concurrent
//! promotions race with last-writer-wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mhd_common::fs::write_json_atomic;

use crate::error::PipelineResult;
use crate::models::{DeploymentManifest, RegistryPromotion, Stage, TrainingRun, UseCase};
use crate::tracking::Tracker;

#[derive(Clone)]
pub struct Deployer {
    registry_dir: PathBuf,
    tracker: Arc<dyn Tracker>,
}

impl Deployer {
    pub fn new(registry_dir: impl Into<PathBuf>, tracker: Arc<dyn Tracker>) -> Self {
        Self {
            registry_dir: registry_dir.into(),
            tracker,
        }
    }

    pub fn registry_dir(&self) -> &Path {
        &self.registry_dir
    }

    pub fn tracker(&self) -> &Arc<dyn Tracker> {
        &self.tracker
    }

    pub fn manifest_path(&self, use_case: UseCase) -> PathBuf {
        self.registry_dir.join(use_case.manifest_file_name())
    }

    /// Point `use_case` at a run
    pub fn promote(&self, manifest: &DeploymentManifest, use_case: UseCase) -> PipelineResult<PathBuf> {
        let path = self.manifest_path(use_case);
        write_json_atomic(&path, manifest)?;
        tracing::info!(
            use_case = %use_case,
            run_id = %manifest.run_id,
            model_version = ?manifest.model_version,
            path = %path.display(),
            "Deployment manifest written"
        );
        Ok(path)
    }

    /// Current manifest of `use_case`, `None` when nothing was deployed
    pub fn read_manifest(&self, use_case: UseCase) -> PipelineResult<Option<DeploymentManifest>> {
        let path = self.manifest_path(use_case);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Register the run's model as a new version and move it to `stage`,
    /// archiving whatever held that stage before
    pub async fn promote_to_registry(
        &self,
        model_name: &str,
        run: &TrainingRun,
        stage: Stage,
    ) -> PipelineResult<RegistryPromotion> {
        self.tracker.ensure_registered_model(model_name).await?;
        let created = self
            .tracker
            .create_model_version(model_name, &run.model_uri, &run.run_id)
            .await?;
        let moved = self
            .tracker
            .transition_stage(model_name, &created.version, stage, true)
            .await?;
        tracing::info!(
            model_name,
            version = %moved.version,
            stage = %moved.stage,
            run_id = %run.run_id,
            "Model version promoted"
        );
        Ok(RegistryPromotion {
            name: moved.name,
            version: moved.version,
            stage: moved.stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metrics;
    use crate::tracking::LocalTracker;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn run(run_id: &str) -> TrainingRun {
        TrainingRun {
            run_id: run_id.to_string(),
            run_name: "logreg".to_string(),
            metrics: Metrics {
                val_auc: Some(0.8),
                ..Default::default()
            },
            model_uri: crate::models::run_model_uri(run_id),
            params: BTreeMap::new(),
            n_train: 8,
            n_val: 2,
        }
    }

    async fn deployer(dir: &TempDir) -> Deployer {
        let db = mhd_common::db::init_in_memory().await.unwrap();
        Deployer::new(dir.path(), Arc::new(LocalTracker::new(db, "test")))
    }

    #[tokio::test]
    async fn test_manifest_slots_are_separate() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir).await;
        assert!(deployer.read_manifest(UseCase::InjuryRisk).unwrap().is_none());

        let manifest = DeploymentManifest::for_run(&run("r1"), UseCase::InjuryRisk, None);
        deployer.promote(&manifest, UseCase::InjuryRisk).unwrap();

        let read = deployer.read_manifest(UseCase::InjuryRisk).unwrap().unwrap();
        assert_eq!(read.run_id, "r1");
        assert_eq!(read.model_version, None);
        assert!(deployer.read_manifest(UseCase::SessionQuality).unwrap().is_none());
        assert!(dir.path().join("deployed.json").exists());
    }

    #[tokio::test]
    async fn test_registry_promotion_archives_previous() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir).await;

        let first = deployer
            .promote_to_registry("mhd_logreg", &run("r1"), Stage::Production)
            .await
            .unwrap();
        let second = deployer
            .promote_to_registry("mhd_logreg", &run("r2"), Stage::Production)
            .await
            .unwrap();
        assert_eq!(first.version, "1");
        assert_eq!(second.version, "2");

        let latest = deployer
            .tracker
            .latest_version("mhd_logreg", Stage::Production)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.run_id, "r2");
        let archived = deployer
            .tracker
            .latest_version("mhd_logreg", Stage::Archived)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(archived.version, "1");
    }
}
