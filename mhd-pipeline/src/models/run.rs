//! Training runs, metrics and deployment records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Served use case; each has its own deployment manifest slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    InjuryRisk,
    SessionQuality,
}

impl UseCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UseCase::InjuryRisk => "injury_risk",
            UseCase::SessionQuality => "session_quality",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "injury_risk" => Some(UseCase::InjuryRisk),
            "session_quality" => Some(UseCase::SessionQuality),
            _ => None,
        }
    }

    /// Manifest file name inside the registry directory
    pub fn manifest_file_name(&self) -> &'static str {
        match self {
            UseCase::InjuryRisk => "deployed.json",
            UseCase::SessionQuality => "deployed_session_quality.json",
        }
    }
}

impl std::fmt::Display for UseCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation metrics of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_auc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_pr_auc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_mae: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_spearman: Option<f64>,
}

impl Metrics {
    /// Flatten to the name → value form logged on the tracker
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        [
            ("val_auc", self.val_auc),
            ("val_pr_auc", self.val_pr_auc),
            ("val_mae", self.val_mae),
            ("val_spearman", self.val_spearman),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
        .collect()
    }
}

/// One model-fitting attempt, immutable once logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub run_id: String,
    pub run_name: String,
    pub metrics: Metrics,
    pub model_uri: String,
    pub params: BTreeMap<String, String>,
    pub n_train: usize,
    pub n_val: usize,
}

/// `runs:/<run_id>/model`
pub fn run_model_uri(run_id: &str) -> String {
    format!("runs:/{}/model", run_id)
}

/// Run id named by a `runs:/<run_id>/...` URI
pub fn run_id_from_uri(model_uri: &str) -> Option<&str> {
    model_uri
        .strip_prefix("runs:/")
        .and_then(|rest| rest.split('/').next())
        .filter(|id| !id.is_empty())
}

/// Registry stage of a model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    None,
    Staging,
    Production,
    Archived,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "None" => Some(Stage::None),
            "Staging" => Some(Stage::Staging),
            "Production" => Some(Stage::Production),
            "Archived" => Some(Stage::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    pub run_id: String,
    pub source: String,
    pub stage: Stage,
}

/// Outcome of a registry promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryPromotion {
    pub name: String,
    pub version: String,
    pub stage: Stage,
}

/// Pointer to the model currently served for a use case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub run_id: String,
    pub model_uri: String,
    pub model_version: Option<String>,
    pub metrics: Metrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_case: Option<UseCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
}

impl DeploymentManifest {
    pub fn for_run(run: &TrainingRun, use_case: UseCase, model_version: Option<String>) -> Self {
        Self {
            run_id: run.run_id.clone(),
            model_uri: run.model_uri.clone(),
            model_version,
            metrics: run.metrics.clone(),
            use_case: Some(use_case),
            deployed_at: Some(Utc::now()),
        }
    }
}
