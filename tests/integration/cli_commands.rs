//! Integration tests for the render-worker CLI
//!
//! Tests cover:
//! - Argument parsing for every subcommand
//! - A dry-run batch through `RunContext` with workspace-relative storage
//! - The binary's check-prompt output never echoing the prompt

use clap::Parser;
use render_worker::cli::{Cli, Commands, RunContext};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn write_config(workspace: &Path) -> std::path::PathBuf {
    let path = workspace.join("worker.toml");
    std::fs::write(
        &path,
        r#"
[providers]
primary_enabled = false

[storage]
artifact_root = "out/artifacts"
status_db_path = "out/status"
"#,
    )
    .unwrap();
    path
}

fn write_base_image(workspace: &Path) -> std::path::PathBuf {
    let path = workspace.join("base.png");
    std::fs::write(&path, super::test_utils::png(16)).unwrap();
    path
}

#[test]
fn test_parse_subcommands() {
    let cli = Cli::try_parse_from([
        "render-worker",
        "--workspace",
        "/tmp/ws",
        "run",
        "--jobs",
        "jobs.jsonl",
        "--dry-run",
    ])
    .unwrap();
    match cli.command {
        Commands::Run { dry_run, format, .. } => {
            assert!(dry_run);
            assert_eq!(format, "text");
        }
        _ => panic!("expected run"),
    }

    let cli = Cli::try_parse_from([
        "render-worker",
        "check-prompt",
        "walnut",
        "--style",
        "rustic",
        "--format",
        "json",
    ])
    .unwrap();
    match cli.command {
        Commands::CheckPrompt { text, style, .. } => {
            assert_eq!(text, "walnut");
            assert_eq!(style.as_deref(), Some("rustic"));
        }
        _ => panic!("expected check-prompt"),
    }

    let cli = Cli::try_parse_from(["render-worker", "config"]).unwrap();
    match cli.command {
        Commands::Config { format } => assert_eq!(format, "json"),
        _ => panic!("expected config"),
    }

    assert!(Cli::try_parse_from(["render-worker", "run"]).is_err());
}

#[tokio::test]
async fn test_dry_run_batch_reports_completions_and_dead_letters() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path();
    let config_path = write_config(workspace);
    let base = write_base_image(workspace);

    let jobs = workspace.join("jobs.jsonl");
    let line = |id: &str| {
        serde_json::json!({
            "type": "texture-render.v1",
            "jobId": id,
            "tenantId": "acme",
            "prompt": format!("plaster wall {}", id),
            "baseImageUri": format!("file://{}", base.display()),
        })
        .to_string()
    };
    std::fs::write(&jobs, format!("{}\n{}\nnot json\n", line("job-1"), line("job-2"))).unwrap();

    let context = RunContext::new(workspace.to_path_buf(), Some(config_path)).unwrap();
    assert_eq!(
        context.config().storage.status_db_path,
        workspace.join("out/status")
    );

    let output = context
        .execute(&Commands::Run {
            jobs,
            dry_run: true,
            format: "json".to_string(),
        })
        .await
        .unwrap();
    let report: serde_json::Value = serde_json::from_str(&output).unwrap();

    assert_eq!(report["stats"]["completed"], 2);
    assert_eq!(report["stats"]["deadLettered"], 1);
    assert_eq!(report["events"].as_array().unwrap().len(), 2);
    assert!(!output.contains("plaster wall"));
    assert!(workspace.join("out/artifacts").exists());
}

#[test]
fn test_check_prompt_binary_masks_prompt() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(temp_dir.path());

    let output = Command::new(env!("CARGO_BIN_EXE_render-worker"))
        .arg("--workspace")
        .arg(temp_dir.path())
        .arg("--config")
        .arg(&config_path)
        .arg("--quiet")
        .arg("check-prompt")
        .arg("call 555-123-4567 about the granite counter")
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "check-prompt should succeed: stderr={:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let verdict: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(verdict["blocked"], false);
    assert!(!stdout.contains("555-123-4567"));
    assert!(!stdout.contains("granite counter"));
    assert_eq!(verdict["redactions"][0], "phone");
}

#[test]
fn test_missing_jobs_file_exits_nonzero() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(temp_dir.path());

    let output = Command::new(env!("CARGO_BIN_EXE_render-worker"))
        .arg("--workspace")
        .arg(temp_dir.path())
        .arg("--config")
        .arg(&config_path)
        .arg("--quiet")
        .arg("run")
        .arg("--jobs")
        .arg(temp_dir.path().join("absent.jsonl"))
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("[invalid_job]"));
}

#[tokio::test]
async fn test_config_command_prints_toml_with_secret_masked() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("worker.toml");
    std::fs::write(
        &config_path,
        r#"
[providers]
openai_api_key = "sk-live-secret"

[pipeline.tenant_limits]
acme = 4
"#,
    )
    .unwrap();

    let context = RunContext::new(temp_dir.path().to_path_buf(), Some(config_path)).unwrap();
    let output = context
        .execute(&Commands::Config {
            format: "toml".to_string(),
        })
        .await
        .unwrap();

    assert!(!output.contains("sk-live-secret"));
    let shown: render_worker::config::RenderConfig = toml::from_str(&output).unwrap();
    assert_eq!(shown.pipeline.tenant_limit("acme"), 4);
    assert_eq!(shown.providers.openai_api_key.as_deref(), Some("********"));
}
