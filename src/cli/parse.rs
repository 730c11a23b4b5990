//! CLI parse: clap types for the render worker. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Render worker CLI - AI render job pipeline
#[derive(Parser)]
#[command(name = "render-worker")]
#[command(about = "Asynchronous AI render job pipeline with safety, fairness and cost limits")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Working root; configuration and relative storage paths resolve against it
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, default_value = "false")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process a batch of job payloads, one JSON object per line
    Run {
        /// JSONL file of `texture-render.v1` payloads
        #[arg(long)]
        jobs: PathBuf,
        /// Skip real generation and echo base images back
        #[arg(long)]
        dry_run: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Run a prompt through the safety gate and show the verdict
    CheckPrompt {
        /// Prompt text
        text: String,
        /// Style suffix to enhance with before the second pass
        #[arg(long)]
        style: Option<String>,
        /// Override the configured maximum prompt length
        #[arg(long)]
        max_length: Option<usize>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration with secrets masked
    Config {
        /// Output format (json or toml)
        #[arg(long, default_value = "json")]
        format: String,
    },
}
