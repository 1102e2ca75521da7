//! Configuration loading and root folder resolution
//!
//! One explicit `PipelineConfig` is built at startup and handed to every
//! component. Values are resolved in this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: a warning is logged and defaults apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the root data folder
pub const ROOT_FOLDER_ENV: &str = "MHD_ROOT_FOLDER";
/// Environment variable naming the TOML config file
pub const CONFIG_FILE_ENV: &str = "MHD_CONFIG";

/// Sources supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// `--config <path>`
    pub config_file: Option<PathBuf>,
    /// `--root-folder <path>`
    pub root_folder: Option<PathBuf>,
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root folder holding the database, manifests, artifacts and blobs
    pub root_folder: Option<PathBuf>,
    /// SQLite database path (defaults to `<root>/mhd.db`)
    pub database_path: Option<PathBuf>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub pipeline: TrainingSettings,
    pub registry: RegistryConfig,
    pub tracking: TrackingConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5730,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Training and promotion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Minimum validation ROC-AUC required for registry promotion
    pub promote_min_auc: f64,
    /// Seed for train/validation splits and synthetic data
    pub random_seed: u64,
    /// Fraction of rows held out for validation
    pub test_fraction: f64,
    /// Label horizon for injury-risk labels
    pub horizon_days: i64,
    pub risk_feature_version: String,
    pub session_feature_version: String,
    /// Rolling windows used by the injury-risk feature builder
    pub lookback_days: Vec<i64>,
    /// Rows synthesised by the generic pipeline
    pub synthetic_rows: usize,
    /// Worker count for the job queue (1 serialises pipeline runs)
    pub max_concurrent_jobs: usize,
    /// Tree count for the session-quality forest
    pub forest_trees: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            promote_min_auc: 0.75,
            random_seed: 42,
            test_fraction: 0.2,
            horizon_days: 14,
            risk_feature_version: "risk_v1".to_string(),
            session_feature_version: "session_v1".to_string(),
            lookback_days: vec![7, 28],
            synthetic_rows: 500,
            max_concurrent_jobs: 1,
            forest_trees: 100,
        }
    }
}

/// Deployment manifest and model registry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding deployment manifests (defaults to `<root>/registry`)
    pub registry_dir: Option<PathBuf>,
    /// Directory holding model artifacts (defaults to `<root>/artifacts`)
    pub artifacts_dir: Option<PathBuf>,
    /// Registered model name for the generic pipeline
    pub model_name: Option<String>,
    pub injury_model_name: Option<String>,
    pub session_model_name: Option<String>,
}

/// Tracking server backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingBackend {
    /// Runs and registry stored in the local SQLite database
    #[default]
    Local,
    /// Remote MLflow tracking server
    Mlflow,
}

impl TrackingBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingBackend::Local => "local",
            TrackingBackend::Mlflow => "mlflow",
        }
    }
}

/// Tracking server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub backend: TrackingBackend,
    pub uri: String,
    pub experiment: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            backend: TrackingBackend::Local,
            uri: "http://mlflow:5000".to_string(),
            experiment: "mhd".to_string(),
        }
    }
}

/// Object storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Filesystem root of the blob store (defaults to `<root>/blobs`)
    pub blob_root: Option<PathBuf>,
    /// Container holding uploaded training CSVs
    pub raw_container: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_root: None,
            raw_container: "mhd-raw".to_string(),
        }
    }
}

/// Periodic monitoring rollups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub interval_hours: u64,
    pub drift_feature: String,
    pub drift_ref_days: i64,
    pub drift_cur_days: i64,
    pub precision_k_pct: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 24,
            drift_feature: "rpe".to_string(),
            drift_ref_days: 7,
            drift_cur_days: 1,
            precision_k_pct: 0.10,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from CLI sources, environment and TOML file
    pub fn load(sources: &ConfigSources) -> Result<Self> {
        let mut config = match resolve_config_path(sources.config_file.as_deref()) {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_toml_file(&path)?
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides()?;

        config.root_folder = Some(resolve_root_folder(
            sources.root_folder.as_deref(),
            ROOT_FOLDER_ENV,
            config.root_folder.as_deref(),
        ));

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML content
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Apply deployment environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("MLFLOW_TRACKING_URI") {
            self.tracking.uri = uri;
            self.tracking.backend = TrackingBackend::Mlflow;
        }
        if let Ok(value) = std::env::var("PROMOTE_MIN_AUC") {
            self.pipeline.promote_min_auc = value.trim().parse().map_err(|_| {
                Error::Config(format!("PROMOTE_MIN_AUC is not a number: {}", value))
            })?;
        }
        if let Ok(dir) = std::env::var("REGISTRY_DIR") {
            self.registry.registry_dir = Some(PathBuf::from(dir));
        }
        if let Ok(name) = std::env::var("MODEL_NAME") {
            self.registry.model_name = Some(name);
        }
        if let Ok(name) = std::env::var("INJURY_MODEL_NAME") {
            self.registry.injury_model_name = Some(name);
        }
        if let Ok(name) = std::env::var("SESSION_MODEL_NAME") {
            self.registry.session_model_name = Some(name);
        }
        Ok(())
    }

    /// Reject values no pipeline can run with
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if !(0.0..=1.0).contains(&p.promote_min_auc) {
            return Err(Error::Config(format!(
                "promote_min_auc must be within [0, 1], got {}",
                p.promote_min_auc
            )));
        }
        if !(p.test_fraction > 0.0 && p.test_fraction < 1.0) {
            return Err(Error::Config(format!(
                "test_fraction must be within (0, 1), got {}",
                p.test_fraction
            )));
        }
        if p.lookback_days.is_empty() || p.lookback_days.iter().any(|d| *d <= 0) {
            return Err(Error::Config(
                "lookback_days must list at least one positive window".to_string(),
            ));
        }
        if p.horizon_days <= 0 {
            return Err(Error::Config("horizon_days must be positive".to_string()));
        }
        if p.max_concurrent_jobs == 0 {
            return Err(Error::Config("max_concurrent_jobs must be at least 1".to_string()));
        }
        if p.forest_trees == 0 {
            return Err(Error::Config("forest_trees must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Root data folder (resolved default when not configured)
    pub fn root(&self) -> PathBuf {
        self.root_folder
            .clone()
            .unwrap_or_else(get_default_root_folder)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.root().join("mhd.db"))
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.registry
            .registry_dir
            .clone()
            .unwrap_or_else(|| self.root().join("registry"))
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.registry
            .artifacts_dir
            .clone()
            .unwrap_or_else(|| self.root().join("artifacts"))
    }

    pub fn blob_root(&self) -> PathBuf {
        self.storage
            .blob_root
            .clone()
            .unwrap_or_else(|| self.root().join("blobs"))
    }

    /// Registered model name used by the generic pipeline
    pub fn model_name(&self) -> String {
        self.registry
            .model_name
            .clone()
            .unwrap_or_else(|| "mhd_logreg".to_string())
    }

    pub fn injury_model_name(&self) -> String {
        self.registry
            .injury_model_name
            .clone()
            .unwrap_or_else(|| "injury_risk_logreg".to_string())
    }

    pub fn session_model_name(&self) -> String {
        self.registry
            .session_model_name
            .clone()
            .unwrap_or_else(|| "session_quality_rf".to_string())
    }

    /// Configuration rooted in a given folder (used by tests and tooling)
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            root_folder: Some(root.into()),
            ..Self::default()
        }
    }
}

/// Root folder resolution:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config value
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    get_default_root_folder()
}

/// Config file location: CLI → `MHD_CONFIG` → `<config_dir>/mhd/mhd-pipeline.toml`
fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("mhd").join("mhd-pipeline.toml"))
}

/// OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/mhd (or /var/lib/mhd for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("mhd"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/mhd"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("mhd"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/mhd"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("mhd"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\mhd"))
    } else {
        PathBuf::from("./mhd_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.pipeline.promote_min_auc, 0.75);
        assert_eq!(config.pipeline.lookback_days, vec![7, 28]);
        assert_eq!(config.pipeline.horizon_days, 14);
        assert_eq!(config.model_name(), "mhd_logreg");
        assert_eq!(config.tracking.backend, TrackingBackend::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            root_folder = "/srv/mhd"

            [pipeline]
            promote_min_auc = 0.8

            [tracking]
            backend = "mlflow"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.promote_min_auc, 0.8);
        assert_eq!(config.pipeline.random_seed, 42);
        assert_eq!(config.tracking.backend, TrackingBackend::Mlflow);
        assert_eq!(config.registry_dir(), PathBuf::from("/srv/mhd/registry"));
        assert_eq!(config.database_path(), PathBuf::from("/srv/mhd/mhd.db"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = PipelineConfig::from_toml_str("pipeline = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = PipelineConfig::default();
        config.pipeline.promote_min_auc = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.pipeline.test_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.pipeline.lookback_days = vec![];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_root_folder_beats_toml() {
        let root = resolve_root_folder(
            Some(Path::new("/from/cli")),
            "MHD_TEST_UNSET_ROOT_VAR",
            Some(Path::new("/from/toml")),
        );
        assert_eq!(root, PathBuf::from("/from/cli"));

        let root = resolve_root_folder(
            None,
            "MHD_TEST_UNSET_ROOT_VAR",
            Some(Path::new("/from/toml")),
        );
        assert_eq!(root, PathBuf::from("/from/toml"));
    }
}
