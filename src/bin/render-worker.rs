//! Render Worker CLI Binary
//!
//! Command-line entry point for the render job pipeline.

use anyhow::Context;
use clap::Parser;
use render_worker::cli::{map_error, Cli, RunContext};
use render_worker::config::ConfigLoader;
use render_worker::error::RenderError;
use render_worker::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(&cli).await {
        error!("Command failed: {:#}", e);
        match e.downcast_ref::<RenderError>() {
            Some(render_error) => eprintln!("{}", map_error(render_error)),
            None => eprintln!("{:#}", e),
        }
        process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    info!("Render worker starting");
    let context = RunContext::new(cli.workspace.clone(), cli.config.clone())
        .context("Failed to load configuration")?;
    let output = context
        .execute(&cli.command)
        .await
        .context("Command execution failed")?;
    info!("Command completed successfully");
    println!("{}", output);
    Ok(())
}

/// Build logging configuration from CLI args, environment, and config file.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path).ok(),
        None => ConfigLoader::load(&cli.workspace).ok(),
    }
    .map(|c| c.logging)
    .unwrap_or_default();

    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if cli.quiet {
        config.level = "off".to_string();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = file.clone();
    }
    config
}
