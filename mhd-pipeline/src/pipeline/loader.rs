//! Resolution of the model currently served for a use case
//!
//! The deployment manifest wins over registry state; the registry
//! "Production" version is only consulted when no manifest exists.

use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactStore;
use crate::error::{PipelineError, PipelineResult};
use crate::ml::ModelArtifact;
use crate::models::{Stage, UseCase};
use crate::pipeline::deploy::Deployer;

/// Where the served model was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    Manifest,
    Registry,
}

/// Identity of a resolved model, reported alongside predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub run_id: String,
    pub model_uri: String,
    pub model_version: Option<String>,
    pub source: ModelSource,
}

#[derive(Clone)]
pub struct ModelLoader {
    deployer: Deployer,
    artifacts: ArtifactStore,
}

impl ModelLoader {
    pub fn new(deployer: Deployer, artifacts: ArtifactStore) -> Self {
        Self { deployer, artifacts }
    }

    /// Manifest model for `use_case`, else the Production version of `model_name`
    pub async fn load_latest_or_production(
        &self,
        use_case: UseCase,
        model_name: Option<&str>,
    ) -> PipelineResult<(ModelArtifact, ModelInfo)> {
        if let Some(manifest) = self.deployer.read_manifest(use_case)? {
            let artifact = self
                .artifacts
                .load_model_uri(&manifest.model_uri)
                .map_err(unavailable)?;
            require_kind(use_case, &artifact)?;
            return Ok((
                artifact,
                ModelInfo {
                    run_id: manifest.run_id,
                    model_uri: manifest.model_uri,
                    model_version: manifest.model_version,
                    source: ModelSource::Manifest,
                },
            ));
        }

        let name = model_name.ok_or_else(|| {
            PipelineError::ModelUnavailable(format!(
                "No deployment manifest for {} and no registered model name configured",
                use_case
            ))
        })?;
        let version = self
            .deployer
            .tracker()
            .latest_version(name, Stage::Production)
            .await?
            .ok_or_else(|| {
                PipelineError::ModelUnavailable(format!(
                    "No deployment manifest for {} and no Production version of {}",
                    use_case, name
                ))
            })?;
        let artifact = self.artifacts.load_model_uri(&version.source).map_err(unavailable)?;
        require_kind(use_case, &artifact)?;
        tracing::debug!(use_case = %use_case, model_name = name, version = %version.version, "Model resolved from registry");
        Ok((
            artifact,
            ModelInfo {
                run_id: version.run_id,
                model_uri: format!("models:/{}/{}", name, Stage::Production),
                model_version: Some(version.version),
                source: ModelSource::Registry,
            },
        ))
    }
}

/// Injury risk is served by classifiers, session quality by regressors
fn require_kind(use_case: UseCase, artifact: &ModelArtifact) -> PipelineResult<()> {
    if artifact.is_classifier() == (use_case == UseCase::InjuryRisk) {
        Ok(())
    } else {
        Err(PipelineError::ModelUnavailable(format!(
            "Model of run {} cannot serve {}",
            artifact.run_id, use_case
        )))
    }
}

fn unavailable(err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Artifact(msg) => PipelineError::ModelUnavailable(msg),
        other => other,
    }
}
