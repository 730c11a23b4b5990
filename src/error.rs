//! Error types for the render pipeline.
//!
//! Every failure is classified at the point of detection. The classification decides
//! whether the queue may redeliver the job, so safety and budget failures are never
//! folded into generic provider errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Storage-related errors (artifact store, status store)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Status record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("Storage data error: {0}")]
    Data(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Short error classification exposed in status records and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PromptRejected,
    TokenLimitExceeded,
    ConcurrencyLimitExceeded,
    CircuitOpen,
    ProviderError,
    StorageError,
    InvalidJob,
    ConfigError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::PromptRejected => "prompt_rejected",
            ErrorKind::TokenLimitExceeded => "token_limit_exceeded",
            ErrorKind::ConcurrencyLimitExceeded => "concurrency_limit_exceeded",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::InvalidJob => "invalid_job",
            ErrorKind::ConfigError => "config_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline errors
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Prompt rejected: {0}")]
    PromptRejected(String),

    #[error("Token limit exceeded: {used} > {limit}")]
    TokenLimitExceeded { used: u64, limit: u64 },

    #[error("Tenant concurrency limit exceeded: {limit} active jobs for tenant {tenant}")]
    ConcurrencyLimitExceeded { tenant: String, limit: u32 },

    #[error("Circuit breaker is open for provider {provider}")]
    CircuitOpen { provider: String },

    #[error("Provider {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Coalesced generation was abandoned before it settled")]
    CoalescedAbandoned,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RenderError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RenderError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classification written to status records and failure events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::PromptRejected(_) => ErrorKind::PromptRejected,
            RenderError::TokenLimitExceeded { .. } => ErrorKind::TokenLimitExceeded,
            RenderError::ConcurrencyLimitExceeded { .. } => ErrorKind::ConcurrencyLimitExceeded,
            RenderError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            RenderError::Timeout { .. }
            | RenderError::Provider { .. }
            | RenderError::CoalescedAbandoned => ErrorKind::ProviderError,
            RenderError::Storage(_) => ErrorKind::StorageError,
            RenderError::InvalidJob(_) => ErrorKind::InvalidJob,
            RenderError::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Whether the queue may redeliver the job after this failure.
    ///
    /// Retrying a safety or budget failure with the same input cannot change the verdict.
    pub fn is_retryable(&self) -> bool {
        match self {
            RenderError::PromptRejected(_) => false,
            RenderError::TokenLimitExceeded { .. } => false,
            RenderError::InvalidJob(_) => false,
            RenderError::Config(_) => false,
            RenderError::ConcurrencyLimitExceeded { .. } => true,
            RenderError::CircuitOpen { .. } => true,
            RenderError::Timeout { .. } => true,
            RenderError::Provider { .. } => true,
            RenderError::CoalescedAbandoned => true,
            RenderError::Storage(_) => true,
        }
    }

    /// Short user-visible message; never carries upstream bodies or prompt text.
    pub fn public_message(&self) -> String {
        match self {
            RenderError::Provider { provider, .. } => {
                format!("Generation failed at provider {}", provider)
            }
            RenderError::Storage(_) => "Failed to store render artifacts".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StorageError> for RenderError {
    fn from(err: StorageError) -> Self {
        RenderError::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for RenderError {
    fn from(err: config::ConfigError) -> Self {
        RenderError::Config(err.to_string())
    }
}
