//! Integration tests for configuration loading

use render_worker::config::{ConfigLoader, RenderConfig};
use std::path::Path;
use tempfile::TempDir;

fn write_workspace_config(root: &Path, body: &str) {
    let dir = root.join("config");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("render-worker.toml"), body).unwrap();
}

#[test]
fn test_workspace_config_layers_over_defaults() {
    let temp_dir = TempDir::new().unwrap();
    write_workspace_config(
        temp_dir.path(),
        r#"
[pipeline]
max_tokens_per_job = 4000
global_concurrency = 8

[pipeline.tenant_limits]
acme = 6

[pipeline.circuit_breaker]
failure_threshold = 3

[storage]
artifact_root = "data/artifacts"
status_db_path = "data/status"
"#,
    );

    let config = ConfigLoader::load(temp_dir.path()).unwrap();

    assert_eq!(config.pipeline.max_tokens_per_job, 4000);
    assert_eq!(config.pipeline.global_concurrency, 8);
    assert_eq!(config.pipeline.tenant_limit("acme"), 6);
    assert_eq!(
        config.pipeline.tenant_limit("globex"),
        config.pipeline.default_tenant_concurrency
    );
    assert_eq!(config.pipeline.circuit_breaker.failure_threshold, 3);
    assert_eq!(
        config.pipeline.circuit_breaker.open_timeout_ms,
        RenderConfig::default().pipeline.circuit_breaker.open_timeout_ms
    );
    assert_eq!(
        config.storage.artifact_root,
        temp_dir.path().join("data/artifacts")
    );
    assert_eq!(
        config.storage.status_db_path,
        temp_dir.path().join("data/status")
    );
}

#[test]
fn test_explicit_file_is_loaded_and_validated() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("worker.toml");
    std::fs::write(
        &config_file,
        r#"
[pipeline]
dry_run = true
cache_ttl_secs = 120
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.pipeline.dry_run);
    assert_eq!(config.pipeline.cache_ttl().as_secs(), 120);
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_values_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("worker.toml");
    std::fs::write(
        &config_file,
        r#"
[pipeline]
default_tenant_concurrency = 0
"#,
    )
    .unwrap();

    let err = ConfigLoader::load_from_file(&config_file).unwrap_err();
    assert!(err.to_string().contains("default_tenant_concurrency"));
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    assert!(ConfigLoader::load_from_file(&temp_dir.path().join("absent.toml")).is_err());
}

#[test]
fn test_redacted_masks_api_key() {
    let mut config = RenderConfig::default();
    config.providers.openai_api_key = Some("sk-live-secret".to_string());
    let shown = serde_json::to_string(&config.redacted()).unwrap();
    assert!(!shown.contains("sk-live-secret"));
}
