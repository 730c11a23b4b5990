//! Image Generation Providers
//!
//! Uniform interface over the generation backends: the hosted image-edit API (primary)
//! and the local diffusion container (fallback). Neither upstream reports usage for this
//! call, so token cost comes from a pluggable [`CostEstimator`].

use crate::error::RenderError;
use crate::job::{Quality, TargetSize};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub mod cost;
pub mod local_diffusion;
pub mod openai;

pub use cost::{cost_cents, ByteLengthEstimator, CostEstimator};
pub use local_diffusion::LocalDiffusionClient;
pub use openai::OpenAIImageEditClient;

/// Provider name reported for dry-run results
pub const DRY_RUN_PROVIDER: &str = "dry-run";

/// Inputs for one generation call
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub base_image: &'a [u8],
    pub mask: Option<&'a [u8]>,
    /// Sanitized, enhanced prompt text
    pub prompt: &'a str,
    pub quality: Quality,
    pub size: TargetSize,
}

/// Raw provider output
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    /// Encoded image bytes
    pub bytes: Vec<u8>,
    pub tokens_used: u64,
    pub provider: String,
}

/// Generation backend
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Stable provider name, used for breakers, cost and status records
    fn name(&self) -> &str;

    /// Whether this provider can serve `request` at all. A provider that declines is
    /// skipped without touching its breaker.
    fn accepts(&self, _request: &GenerationRequest<'_>) -> bool {
        true
    }

    /// Generate one image. Must report a non-zero token cost on success.
    async fn generate(&self, request: &GenerationRequest<'_>)
        -> Result<GeneratedImage, RenderError>;
}

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client shared by the provider implementations.
pub(crate) fn build_provider_http_client(request_timeout: Duration) -> Result<Client, RenderError> {
    Client::builder()
        .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
        .timeout(request_timeout)
        .build()
        .map_err(|e| RenderError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Map a transport error onto the pipeline taxonomy.
pub(crate) fn map_http_error(provider: &str, timeout: Duration, error: reqwest::Error) -> RenderError {
    if error.is_timeout() {
        RenderError::Timeout {
            provider: provider.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if error.is_connect() {
        RenderError::provider(provider, format!("Connection error: {}", error))
    } else {
        RenderError::provider(provider, format!("HTTP error: {}", error))
    }
}

/// Turn a non-success response into a provider error, keeping a bounded body excerpt.
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> RenderError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let excerpt: String = body.chars().take(200).collect();
    let kind = match status.as_u16() {
        401 | 403 => "Authentication failed",
        429 => "Rate limit exceeded",
        400 | 422 => "Request rejected",
        _ => "Request failed",
    };
    RenderError::provider(provider, format!("{} ({}): {}", kind, status, excerpt))
}
