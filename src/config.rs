//! Configuration System
//!
//! Layered configuration for the render worker: merge-policy defaults, then optional TOML
//! files under the working root, then `RENDER_`-prefixed environment variables, then the
//! flat environment names the worker has always honoured (`DRY_RUN_MODE`, ...).

use crate::error::RenderError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod loader;
mod merge_policy;
mod sources;

pub use loader::ConfigLoader;
pub use sources::env::apply_legacy_overrides;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Job processing policy
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Generation provider settings
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Artifact and status storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Job processing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Skip real generation and echo the base image back
    #[serde(default)]
    pub dry_run: bool,

    /// Hard per-job token ceiling
    #[serde(default = "default_max_tokens_per_job")]
    pub max_tokens_per_job: u64,

    /// Concurrency ceiling for tenants without an override
    #[serde(default = "default_tenant_concurrency")]
    pub default_tenant_concurrency: u32,

    /// Per-tenant concurrency overrides
    #[serde(default)]
    pub tenant_limits: HashMap<String, u32>,

    /// Size of the worker pool
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,

    /// Prompt length after which text is truncated
    #[serde(default = "default_prompt_max_length")]
    pub prompt_max_length: usize,

    /// Generation cache entry lifetime
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Lifetime of a tenant slot counter; bounds leakage after a crash
    #[serde(default = "default_tenant_slot_ttl_secs")]
    pub tenant_slot_ttl_secs: u64,

    /// Queue attempt ceiling for retryable failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Redelivery delay after a concurrency-limit rejection
    #[serde(default = "default_concurrency_retry_backoff_ms")]
    pub concurrency_retry_backoff_ms: u64,

    /// Redelivery delay after a provider or storage failure
    #[serde(default = "default_failure_retry_backoff_ms")]
    pub failure_retry_backoff_ms: u64,

    #[serde(default)]
    pub circuit_breaker: BreakerConfig,
}

/// Circuit breaker thresholds, shared by every provider's breaker
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_breaker_threshold")]
    pub failure_threshold: u32,

    /// Time after the last failure before a trial call is let through
    #[serde(default = "default_breaker_timeout_ms")]
    pub open_timeout_ms: u64,
}

/// Generation provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Use the hosted image-edit provider as primary
    #[serde(default = "default_true")]
    pub primary_enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    /// Local diffusion container used as fallback
    #[serde(default = "default_fallback_endpoint")]
    pub fallback_endpoint: String,

    /// Bound on a single provider call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Bound on a single reference-image download
    #[serde(default = "default_download_timeout_ms")]
    pub download_timeout_ms: u64,
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for rendered artifacts
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,

    /// sled database holding job status records
    #[serde(default = "default_status_db_path")]
    pub status_db_path: PathBuf,
}

fn default_max_tokens_per_job() -> u64 {
    10_000
}

fn default_tenant_concurrency() -> u32 {
    2
}

fn default_global_concurrency() -> usize {
    5
}

fn default_prompt_max_length() -> usize {
    1500
}

fn default_cache_ttl_secs() -> u64 {
    60 * 60
}

fn default_tenant_slot_ttl_secs() -> u64 {
    60 * 60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_concurrency_retry_backoff_ms() -> u64 {
    5_000
}

fn default_failure_retry_backoff_ms() -> u64 {
    10_000
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_timeout_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "dall-e-2".to_string()
}

fn default_fallback_endpoint() -> String {
    "http://localhost:7860".to_string()
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_download_timeout_ms() -> u64 {
    30_000
}

fn data_root() -> PathBuf {
    directories::ProjectDirs::from("", "", "render-worker")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".render-worker"))
}

fn default_artifact_root() -> PathBuf {
    data_root().join("artifacts")
}

fn default_status_db_path() -> PathBuf {
    data_root().join("status")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_tokens_per_job: default_max_tokens_per_job(),
            default_tenant_concurrency: default_tenant_concurrency(),
            tenant_limits: HashMap::new(),
            global_concurrency: default_global_concurrency(),
            prompt_max_length: default_prompt_max_length(),
            cache_ttl_secs: default_cache_ttl_secs(),
            tenant_slot_ttl_secs: default_tenant_slot_ttl_secs(),
            max_attempts: default_max_attempts(),
            concurrency_retry_backoff_ms: default_concurrency_retry_backoff_ms(),
            failure_retry_backoff_ms: default_failure_retry_backoff_ms(),
            circuit_breaker: BreakerConfig::default(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_threshold(),
            open_timeout_ms: default_breaker_timeout_ms(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary_enabled: true,
            openai_api_key: None,
            openai_base_url: default_openai_base_url(),
            openai_model: default_openai_model(),
            fallback_endpoint: default_fallback_endpoint(),
            request_timeout_ms: default_request_timeout_ms(),
            download_timeout_ms: default_download_timeout_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifact_root: default_artifact_root(),
            status_db_path: default_status_db_path(),
        }
    }
}

impl PipelineConfig {
    /// Concurrency ceiling for `tenant`, falling back to the default.
    pub fn tenant_limit(&self, tenant: &str) -> u32 {
        self.tenant_limits
            .get(tenant)
            .copied()
            .unwrap_or(self.default_tenant_concurrency)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn tenant_slot_ttl(&self) -> Duration {
        Duration::from_secs(self.tenant_slot_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens_per_job == 0 {
            return Err("max_tokens_per_job must be positive".to_string());
        }
        if self.default_tenant_concurrency == 0 {
            return Err("default_tenant_concurrency must be positive".to_string());
        }
        if let Some((tenant, _)) = self.tenant_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(format!("tenant limit for '{}' must be positive", tenant));
        }
        if self.global_concurrency == 0 {
            return Err("global_concurrency must be positive".to_string());
        }
        if self.prompt_max_length == 0 {
            return Err("prompt_max_length must be positive".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be positive".to_string());
        }
        Ok(())
    }
}

impl BreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !is_http_url(&self.fallback_endpoint) {
            return Err(format!(
                "fallback_endpoint must be an http(s) URL, got '{}'",
                self.fallback_endpoint
            ));
        }
        if self.primary_enabled && !is_http_url(&self.openai_base_url) {
            return Err(format!(
                "openai_base_url must be an http(s) URL, got '{}'",
                self.openai_base_url
            ));
        }
        if self.request_timeout_ms == 0 || self.download_timeout_ms == 0 {
            return Err("timeouts must be positive".to_string());
        }
        Ok(())
    }

    /// Whether the hosted primary can actually be constructed.
    pub fn primary_available(&self) -> bool {
        self.primary_enabled
            && self
                .openai_api_key
                .as_deref()
                .map(|key| !key.trim().is_empty())
                .unwrap_or(false)
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.artifact_root.as_os_str().is_empty() {
            return Err("artifact_root cannot be empty".to_string());
        }
        if self.status_db_path.as_os_str().is_empty() {
            return Err("status_db_path cannot be empty".to_string());
        }
        Ok(())
    }

    /// Resolve relative storage paths against `root`.
    pub fn resolved(&self, root: &Path) -> StorageConfig {
        let resolve = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                root.join(p)
            }
        };
        StorageConfig {
            artifact_root: resolve(&self.artifact_root),
            status_db_path: resolve(&self.status_db_path),
        }
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Pipeline(String),
    Providers(String),
    Storage(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Pipeline(msg) => write!(f, "Pipeline: {}", msg),
            ValidationError::Providers(msg) => write!(f, "Providers: {}", msg),
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl RenderConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.pipeline.validate() {
            errors.push(ValidationError::Pipeline(e));
        }
        if let Err(e) = self.providers.validate() {
            errors.push(ValidationError::Providers(e));
        }
        if let Err(e) = self.storage.validate() {
            errors.push(ValidationError::Storage(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold every problem into one error.
    pub fn validated(self) -> Result<Self, RenderError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            RenderError::Config(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(self)
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> RenderConfig {
        let mut copy = self.clone();
        if copy.providers.openai_api_key.is_some() {
            copy.providers.openai_api_key = Some("********".to_string());
        }
        copy
    }
}
