//! Configuration loading and priority order
//!
//! Tests that touch environment variables are marked `#[serial]` so they
//! never run in parallel with each other.

use mhd_common::config::{ConfigSources, PipelineConfig, TrackingBackend, ROOT_FOLDER_ENV};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

const OVERRIDE_VARS: &[&str] = &[
    ROOT_FOLDER_ENV,
    "MHD_CONFIG",
    "MLFLOW_TRACKING_URI",
    "PROMOTE_MIN_AUC",
    "REGISTRY_DIR",
    "MODEL_NAME",
    "INJURY_MODEL_NAME",
    "SESSION_MODEL_NAME",
];

fn clear_env() {
    for var in OVERRIDE_VARS {
        env::remove_var(var);
    }
}

fn write_config(dir: &std::path::Path, body: &str) -> PathBuf {
    let path = dir.join("mhd-pipeline.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
#[serial]
fn test_missing_config_file_uses_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();

    let config = PipelineConfig::load(&ConfigSources {
        config_file: Some(dir.path().join("absent.toml")),
        root_folder: Some(dir.path().to_path_buf()),
    })
    .unwrap();

    assert_eq!(config.pipeline.promote_min_auc, 0.75);
    assert_eq!(config.server.port, 5730);
    assert_eq!(config.root(), dir.path());
}

#[test]
#[serial]
fn test_root_folder_priority_cli_env_toml() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "root_folder = \"/from/toml\"\n");

    // TOML only
    let config = PipelineConfig::load(&ConfigSources {
        config_file: Some(path.clone()),
        root_folder: None,
    })
    .unwrap();
    assert_eq!(config.root(), PathBuf::from("/from/toml"));

    // ENV beats TOML
    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let config = PipelineConfig::load(&ConfigSources {
        config_file: Some(path.clone()),
        root_folder: None,
    })
    .unwrap();
    assert_eq!(config.root(), PathBuf::from("/from/env"));

    // CLI beats ENV
    let config = PipelineConfig::load(&ConfigSources {
        config_file: Some(path),
        root_folder: Some(PathBuf::from("/from/cli")),
    })
    .unwrap();
    assert_eq!(config.root(), PathBuf::from("/from/cli"));

    clear_env();
}

#[test]
#[serial]
fn test_environment_overrides_toml_values() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
        [pipeline]
        promote_min_auc = 0.6

        [registry]
        model_name = "from_toml"
        "#,
    );

    env::set_var("PROMOTE_MIN_AUC", "0.9");
    env::set_var("MODEL_NAME", "from_env");
    env::set_var("REGISTRY_DIR", "/srv/registry");
    env::set_var("MLFLOW_TRACKING_URI", "http://tracking:5000");

    let config = PipelineConfig::load(&ConfigSources {
        config_file: Some(path),
        root_folder: Some(dir.path().to_path_buf()),
    })
    .unwrap();

    assert_eq!(config.pipeline.promote_min_auc, 0.9);
    assert_eq!(config.model_name(), "from_env");
    assert_eq!(config.registry_dir(), PathBuf::from("/srv/registry"));
    assert_eq!(config.tracking.backend, TrackingBackend::Mlflow);
    assert_eq!(config.tracking.uri, "http://tracking:5000");

    clear_env();
}

#[test]
#[serial]
fn test_unparseable_threshold_is_rejected() {
    clear_env();
    env::set_var("PROMOTE_MIN_AUC", "high");

    let result = PipelineConfig::load(&ConfigSources {
        config_file: None,
        root_folder: Some(PathBuf::from("/tmp/mhd-test")),
    });
    assert!(result.is_err());

    clear_env();
}

#[test]
#[serial]
fn test_config_file_from_environment() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[server]\nport = 6000\n");
    env::set_var("MHD_CONFIG", &path);

    let config = PipelineConfig::load(&ConfigSources {
        config_file: None,
        root_folder: Some(dir.path().to_path_buf()),
    })
    .unwrap();
    assert_eq!(config.server.port, 6000);

    clear_env();
}
