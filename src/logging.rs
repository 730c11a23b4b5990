//! Logging System
//!
//! Structured logging using the `tracing` crate. Log level, output format and destination
//! come from configuration, overridable through `RENDER_LOG*` environment variables.
//! Prompt text never reaches a log line; callers log the prompt hash and masked preview.

use crate::error::RenderError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file (default: stderr, keeping stdout for
    /// command output)
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path (if output is "file")
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Enable colored output (text format only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/render-worker.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: default_log_file(),
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

type FilteredRegistry = Layered<EnvFilter, Registry>;

/// Install the global subscriber.
///
/// `RENDER_LOG`, `RENDER_LOG_FORMAT` and `RENDER_LOG_OUTPUT` win over `config`, which wins
/// over defaults. Fails if a subscriber is already installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), RenderError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);

    let filter = build_env_filter(config)?;
    let format = resolve(&config.format, "RENDER_LOG_FORMAT", LogFormat::parse)?;
    let output = resolve(&config.output, "RENDER_LOG_OUTPUT", OutputDestination::parse)?;

    let ansi = config.color && output != OutputDestination::File;
    let writer = match output {
        OutputDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
        OutputDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
        OutputDestination::File => BoxMakeWriter::new(Mutex::new(open_log_file(&config.file)?)),
    };

    let layer: Box<dyn Layer<FilteredRegistry> + Send + Sync> = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_target(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    };

    Registry::default()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| RenderError::Config(format!("Failed to install log subscriber: {}", e)))
}

fn open_log_file(path: &Path) -> Result<File, RenderError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| RenderError::Config(format!("Failed to create log directory: {}", e)))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            RenderError::Config(format!("Failed to open log file {}: {}", path.display(), e))
        })
}

/// Level from `RENDER_LOG` if set, otherwise the configured level plus per-module
/// directives from the config and `RENDER_LOG_MODULES` (`module=level,...`).
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, RenderError> {
    if let Ok(filter) = EnvFilter::try_from_env("RENDER_LOG") {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let from_env = std::env::var("RENDER_LOG_MODULES").unwrap_or_default();
    let env_pairs = from_env.split(',').filter_map(|pair| {
        let (module, level) = pair.split_once('=')?;
        Some((module.trim().to_string(), level.trim().to_string()))
    });
    let config_pairs = config
        .modules
        .iter()
        .map(|(module, level)| (module.clone(), level.clone()));

    config_pairs
        .chain(env_pairs)
        .try_fold(EnvFilter::new(&config.level), |filter, (module, level)| {
            let directive: Directive = format!("{}={}", module, level)
                .parse()
                .map_err(|e| RenderError::Config(format!("Invalid log directive: {}", e)))?;
            Ok(filter.add_directive(directive))
        })
}

/// Environment value if it parses, else the configured value, which must parse.
fn resolve<T>(
    configured: &str,
    env_var: &str,
    parse: fn(&str) -> Result<T, RenderError>,
) -> Result<T, RenderError> {
    if let Some(value) = std::env::var(env_var).ok().and_then(|v| parse(&v).ok()) {
        return Ok(value);
    }
    parse(configured)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self, RenderError> {
        match value {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(RenderError::Config(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputDestination {
    Stdout,
    Stderr,
    File,
}

impl OutputDestination {
    fn parse(value: &str) -> Result<Self, RenderError> {
        match value {
            "stdout" => Ok(OutputDestination::Stdout),
            "stderr" => Ok(OutputDestination::Stderr),
            "file" => Ok(OutputDestination::File),
            other => Err(RenderError::Config(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr' or 'file')",
                other
            ))),
        }
    }
}
