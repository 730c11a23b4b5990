//! Provider Orchestrator
//!
//! One generation per job attempt: the primary provider behind its breaker, and on any
//! failure (fast-fail included) the fallback behind its own breaker. If both fail, the
//! fallback's error is the result. Retrying is the queue's job, not the orchestrator's.

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::{BreakerConfig, RenderConfig};
use crate::error::RenderError;
use crate::provider::{
    ByteLengthEstimator, CostEstimator, GeneratedImage, GenerationRequest, ImageProvider,
    LocalDiffusionClient, OpenAIImageEditClient, DRY_RUN_PROVIDER,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct GuardedProvider {
    provider: Arc<dyn ImageProvider>,
    breaker: CircuitBreaker,
}

impl GuardedProvider {
    fn new(provider: Arc<dyn ImageProvider>, breaker_config: &BreakerConfig) -> Self {
        let breaker = CircuitBreaker::from_config(provider.name(), breaker_config);
        Self { provider, breaker }
    }
}

/// Primary/fallback generation with per-provider circuit breakers
pub struct ProviderOrchestrator {
    primary: Option<GuardedProvider>,
    fallback: GuardedProvider,
    request_timeout: Duration,
    dry_run: bool,
}

impl ProviderOrchestrator {
    pub fn new(
        primary: Option<Arc<dyn ImageProvider>>,
        fallback: Arc<dyn ImageProvider>,
        breaker_config: &BreakerConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            primary: primary.map(|p| GuardedProvider::new(p, breaker_config)),
            fallback: GuardedProvider::new(fallback, breaker_config),
            request_timeout,
            dry_run: false,
        }
    }

    /// Skip generation entirely and echo the base image back.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Build the configured HTTP providers.
    pub fn from_config(config: &RenderConfig) -> Result<Self, RenderError> {
        let providers = &config.providers;
        let estimator: Arc<dyn CostEstimator> = Arc::new(ByteLengthEstimator);

        let primary: Option<Arc<dyn ImageProvider>> = if providers.primary_available() {
            Some(Arc::new(OpenAIImageEditClient::new(
                providers.openai_api_key.clone().unwrap_or_default(),
                providers.openai_base_url.clone(),
                providers.openai_model.clone(),
                providers.request_timeout(),
                Arc::clone(&estimator),
            )?))
        } else {
            if providers.primary_enabled {
                warn!("Primary provider enabled but no API key configured; using fallback only");
            }
            None
        };
        let fallback: Arc<dyn ImageProvider> = Arc::new(LocalDiffusionClient::new(
            providers.fallback_endpoint.clone(),
            providers.request_timeout(),
            estimator,
        )?);

        info!(
            primary = primary.as_ref().map(|p| p.name()).unwrap_or("none"),
            fallback = fallback.name(),
            dry_run = config.pipeline.dry_run,
            "Provider orchestrator configured"
        );

        Ok(Self::new(
            primary,
            fallback,
            &config.pipeline.circuit_breaker,
            providers.request_timeout(),
        )
        .with_dry_run(config.pipeline.dry_run))
    }

    /// Generate one image for `request`.
    pub async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedImage, RenderError> {
        if self.dry_run {
            warn!("Dry-run mode: skipping generation");
            return Ok(GeneratedImage {
                bytes: request.base_image.to_vec(),
                tokens_used: 0,
                provider: DRY_RUN_PROVIDER.to_string(),
            });
        }

        if let Some(primary) = &self.primary {
            if primary.provider.accepts(request) {
                match self.call(primary, request).await {
                    Ok(image) => return Ok(image),
                    Err(e) => warn!(
                        provider = primary.provider.name(),
                        error_kind = %e.kind(),
                        error = %e,
                        fallback = self.fallback.provider.name(),
                        "Primary provider failed, falling back"
                    ),
                }
            } else {
                debug!(
                    provider = primary.provider.name(),
                    "Primary provider declined request"
                );
            }
        }

        self.call(&self.fallback, request).await
    }

    async fn call(
        &self,
        guarded: &GuardedProvider,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedImage, RenderError> {
        let provider = guarded.provider.as_ref();
        let timeout = self.request_timeout;
        let mut image = guarded
            .breaker
            .execute(|| async move {
                let image = match tokio::time::timeout(timeout, provider.generate(request)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(RenderError::Timeout {
                            provider: provider.name().to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        })
                    }
                };
                if image.bytes.is_empty() {
                    return Err(RenderError::provider(provider.name(), "Empty image returned"));
                }
                Ok::<_, RenderError>(image)
            })
            .await?;

        image.tokens_used = image.tokens_used.max(1);
        debug!(
            provider = provider.name(),
            tokens_used = image.tokens_used,
            "Provider generation succeeded"
        );
        Ok(image)
    }

    /// Current breaker state per provider, primary first.
    pub fn breaker_states(&self) -> Vec<(String, BreakerState)> {
        self.primary
            .iter()
            .chain(std::iter::once(&self.fallback))
            .map(|g| (g.breaker.name().to_string(), g.breaker.state()))
            .collect()
    }
}
