//! Local model artifact store
//!
//! Layout: `<artifacts_dir>/<run_id>/model.json` plus any text documents
//! attached to the run.

use std::path::{Path, PathBuf};

use mhd_common::fs::{write_atomic, write_json_atomic};

use crate::error::{PipelineError, PipelineResult};
use crate::ml::ModelArtifact;
use crate::models::run_id_from_uri;

const MODEL_FILE: &str = "model.json";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Persist a fitted model under its run id
    pub fn save_model(&self, artifact: &ModelArtifact) -> PipelineResult<PathBuf> {
        let path = self.run_dir(&artifact.run_id).join(MODEL_FILE);
        write_json_atomic(&path, artifact)?;
        tracing::debug!(run_id = %artifact.run_id, path = %path.display(), "Saved model artifact");
        Ok(path)
    }

    pub fn load_model(&self, run_id: &str) -> PipelineResult<ModelArtifact> {
        let path = self.run_dir(run_id).join(MODEL_FILE);
        let bytes = std::fs::read(&path).map_err(|e| {
            PipelineError::Artifact(format!("No model artifact for run {} ({}): {}", run_id, path.display(), e))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::Artifact(format!("Unreadable model artifact for run {}: {}", run_id, e))
        })
    }

    /// Load the model named by a `runs:/<run_id>/model` URI
    pub fn load_model_uri(&self, model_uri: &str) -> PipelineResult<ModelArtifact> {
        let run_id = run_id_from_uri(model_uri)
            .ok_or_else(|| PipelineError::Artifact(format!("Unsupported model URI: {}", model_uri)))?;
        self.load_model(run_id)
    }

    pub fn write_text(&self, run_id: &str, name: &str, text: &str) -> PipelineResult<PathBuf> {
        let path = self.run_dir(run_id).join(name);
        write_atomic(&path, text.as_bytes())?;
        Ok(path)
    }
}
