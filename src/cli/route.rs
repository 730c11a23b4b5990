//! CLI route: run context and command dispatch.

use crate::cli::parse::Commands;
use crate::cli::presentation::{format_prompt_check, format_run_summary, RunSummary};
use crate::config::{ConfigLoader, RenderConfig};
use crate::error::RenderError;
use crate::events::ChannelEventPublisher;
use crate::processor::JobProcessor;
use crate::queue::{MemoryJobQueue, QueueConsumer};
use crate::safety::sanitize;
use crate::status::SledStatusStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Runtime context for CLI execution: the loaded configuration and working root.
pub struct RunContext {
    config: RenderConfig,
    workspace_root: PathBuf,
}

impl RunContext {
    /// Load configuration from `config_path` when given, else the layered sources under
    /// `workspace_root`.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, RenderError> {
        let config = match config_path {
            Some(ref path) => {
                let mut config = ConfigLoader::load_from_file(path)?;
                config.storage = config.storage.resolved(&workspace_root);
                config
            }
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self {
            config,
            workspace_root,
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Execute a command and return its rendered output.
    pub async fn execute(&self, command: &Commands) -> Result<String, RenderError> {
        match command {
            Commands::Run {
                jobs,
                dry_run,
                format,
            } => self.handle_run(jobs, *dry_run, format).await,
            Commands::CheckPrompt {
                text,
                style,
                max_length,
                format,
            } => {
                let max = max_length.unwrap_or(self.config.pipeline.prompt_max_length);
                let prompt = sanitize(text, max);
                let prompt = match style {
                    Some(style) => prompt.enhance(style, max),
                    None => prompt,
                };
                format_prompt_check(&prompt, format)
            }
            Commands::Config { format } => {
                let redacted = self.config.redacted();
                if format == "toml" {
                    toml::to_string_pretty(&redacted)
                        .map_err(|e| RenderError::Config(format!("Failed to render config: {}", e)))
                } else {
                    serde_json::to_string_pretty(&redacted)
                        .map_err(|e| RenderError::Config(format!("Failed to render config: {}", e)))
                }
            }
        }
    }

    async fn handle_run(
        &self,
        jobs_path: &Path,
        dry_run: bool,
        format: &str,
    ) -> Result<String, RenderError> {
        let mut config = self.config.clone();
        config.pipeline.dry_run |= dry_run;

        let contents = tokio::fs::read_to_string(jobs_path).await.map_err(|e| {
            RenderError::InvalidJob(format!("Failed to read {}: {}", jobs_path.display(), e))
        })?;
        let queue = Arc::new(MemoryJobQueue::new());
        let mut submitted = 0usize;
        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            queue.push(line.as_bytes().to_vec());
            submitted += 1;
        }
        info!(submitted, dry_run = config.pipeline.dry_run, "Submitted job batch");

        if let Some(parent) = config.storage.status_db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RenderError::Storage(format!("Failed to create status dir: {}", e)))?;
        }
        let status = SledStatusStore::open(&config.storage.status_db_path)?;
        let (publisher, mut receiver) = ChannelEventPublisher::new_pair();
        let processor = Arc::new(JobProcessor::from_config(
            &config,
            status.clone(),
            Arc::new(publisher),
        )?);

        let consumer = QueueConsumer::new(
            queue.clone(),
            processor,
            config.pipeline.global_concurrency,
        );
        consumer.start();
        let drained = consumer.wait_for_idle(None).await;
        consumer.stop().await;
        drained?;
        status.flush()?;

        let mut summary = RunSummary {
            stats: consumer.stats(),
            dead_letters: queue.dead_letters(),
            ..RunSummary::default()
        };
        while let Ok(envelope) = receiver.try_recv() {
            summary.events.push(envelope);
        }
        format_run_summary(&summary, format)
    }
}
