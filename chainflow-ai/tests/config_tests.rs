//! Configuration loading and environment override tests
//!
//! Tests touching CHAINFLOW_* variables run #[serial].

use chainflow_ai::config::ChainflowConfig;
use chainflow_common::config::load_toml_config;
use chainflow_common::Error;
use serial_test::serial;
use std::env;
use tempfile::TempDir;

fn clear_overrides() {
    env::remove_var("CHAINFLOW_WORKERS");
    env::remove_var("CHAINFLOW_INFERENCE_ENDPOINT");
    env::remove_var("CHAINFLOW_INFERENCE_MODEL");
}

#[test]
#[serial]
fn test_env_overrides_apply_on_top_of_file() {
    clear_overrides();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("chainflow-ai.toml");
    std::fs::write(
        &path,
        r#"
[pipeline]
workers = 2

[inference]
endpoint = "http://file-host:11434"
model = "file-model"
"#,
    )
    .unwrap();

    env::set_var("CHAINFLOW_WORKERS", "6");
    env::set_var("CHAINFLOW_INFERENCE_MODEL", "env-model");

    let mut config: ChainflowConfig = load_toml_config(Some(&path)).unwrap();
    config.apply_env_overrides().unwrap();

    assert_eq!(config.pipeline.workers, 6);
    assert_eq!(config.inference.model, "env-model");
    assert_eq!(config.inference.endpoint, "http://file-host:11434");
    assert!(config.validate().is_ok());

    clear_overrides();
}

#[test]
#[serial]
fn test_non_numeric_worker_override_rejected() {
    clear_overrides();
    env::set_var("CHAINFLOW_WORKERS", "many");

    let mut config = ChainflowConfig::default();
    let err = config.apply_env_overrides().unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    clear_overrides();
}

#[test]
#[serial]
fn test_worker_override_still_validated() {
    clear_overrides();
    env::set_var("CHAINFLOW_WORKERS", "64");

    let mut config = ChainflowConfig::default();
    config.apply_env_overrides().unwrap();
    assert!(matches!(config.validate(), Err(Error::Config(_))));

    clear_overrides();
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    clear_overrides();
    let temp_dir = TempDir::new().unwrap();

    let config: ChainflowConfig = load_toml_config(Some(&temp_dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config, ChainflowConfig::default());
}

#[test]
fn test_malformed_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "[pipeline\nworkers = ").unwrap();

    let result: chainflow_common::Result<ChainflowConfig> = load_toml_config(Some(&path));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_effective_config_round_trips_through_toml() {
    let mut config = ChainflowConfig::default();
    config.pipeline.rate.max_requests_per_minute = Some(30);

    let text = toml::to_string_pretty(&config).unwrap();
    let parsed: ChainflowConfig = toml::from_str(&text).unwrap();
    assert_eq!(parsed, config);
}
