//! Job Processor
//!
//! Drives one job through the pipeline:
//!
//! ```text
//! received -> admitted -> (cache-hit | generating) -> persisting -> completed
//!                 \______________ any failure ______________________/-> failed
//! ```
//!
//! Every path that gets past admission ends with a terminal status write and one event.
//! The tenant slot is held by a scoped guard and released however the job ends.

use crate::admission::{SlotGuard, TenantAdmissionController};
use crate::assets::{
    derive_images, store_all, ArtifactStore, AssetFetcher, FsArtifactStore, HttpAssetFetcher,
};
use crate::cache::{CacheEntry, CacheKey, Coalescer, GenerationCache, KeyParts};
use crate::config::{PipelineConfig, RenderConfig};
use crate::error::{ErrorKind, RenderError};
use crate::events::{EventPublisher, RenderEvent};
use crate::job::Job;
use crate::orchestrator::ProviderOrchestrator;
use crate::provider::{cost_cents, GeneratedImage, GenerationRequest};
use crate::safety::{sanitize, SanitizedPrompt};
use crate::status::{
    JobStatus, RenderResult, StatusMetadata, StatusRecord, StatusStore, TerminalWrite,
};
use crate::types::now_millis;
use futures::future::try_join;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What the queue should do with a delivery once the processor is done with it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Terminal; remove from the queue
    Ack,
    /// Redeliver after the delay
    Retry { after: Duration },
    /// Terminal failure, or retries exhausted
    DeadLetter,
}

/// Result of processing one delivery
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub result: RenderResult,
    pub disposition: Disposition,
    /// Whether a terminal status record is stored for the job
    pub persisted: bool,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.result {
            RenderResult::Failure { error_kind, .. } => Some(*error_kind),
            RenderResult::Success { .. } => None,
        }
    }
}

/// Shared result of one generation, fanned out to coalesced waiters
#[derive(Debug, Clone)]
struct Generation {
    entry: CacheEntry,
    /// Served from cache by the leader's re-check rather than generated
    from_cache: bool,
}

/// Runs jobs through admission, safety, cache, generation and persistence
pub struct JobProcessor {
    config: PipelineConfig,
    admission: Arc<TenantAdmissionController>,
    cache: Arc<GenerationCache>,
    coalescer: Arc<Coalescer<Generation>>,
    orchestrator: Arc<ProviderOrchestrator>,
    fetcher: Arc<dyn AssetFetcher>,
    artifacts: Arc<dyn ArtifactStore>,
    status: Arc<dyn StatusStore>,
    events: Arc<dyn EventPublisher>,
}

impl JobProcessor {
    /// Build a processor with in-memory admission and cache sized from `config`.
    pub fn new(
        config: PipelineConfig,
        orchestrator: Arc<ProviderOrchestrator>,
        fetcher: Arc<dyn AssetFetcher>,
        artifacts: Arc<dyn ArtifactStore>,
        status: Arc<dyn StatusStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let admission = Arc::new(TenantAdmissionController::in_memory(config.tenant_slot_ttl()));
        let cache = Arc::new(GenerationCache::new(config.cache_ttl()));
        Self {
            config,
            admission,
            cache,
            coalescer: Arc::new(Coalescer::new()),
            orchestrator,
            fetcher,
            artifacts,
            status,
            events,
        }
    }

    /// Share an admission controller, e.g. one backed by an external slot store.
    pub fn with_admission(mut self, admission: Arc<TenantAdmissionController>) -> Self {
        self.admission = admission;
        self
    }

    /// Wire up the HTTP providers, fetcher and filesystem artifact store from configuration.
    pub fn from_config(
        config: &RenderConfig,
        status: Arc<dyn StatusStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self, RenderError> {
        let orchestrator = Arc::new(ProviderOrchestrator::from_config(config)?);
        let fetcher = Arc::new(HttpAssetFetcher::new(config.providers.download_timeout())?);
        let artifacts = Arc::new(FsArtifactStore::new(&config.storage.artifact_root)?);
        Ok(Self::new(
            config.pipeline.clone(),
            orchestrator,
            fetcher,
            artifacts,
            status,
            events,
        ))
    }

    pub fn admission(&self) -> &TenantAdmissionController {
        &self.admission
    }

    pub fn cache(&self) -> &GenerationCache {
        &self.cache
    }

    pub fn orchestrator(&self) -> &ProviderOrchestrator {
        &self.orchestrator
    }

    /// Process one delivery of `job` to a terminal result.
    pub async fn process(&self, job: &Job) -> JobOutcome {
        let started = Instant::now();
        debug!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempt,
            state = "received",
            "Job received"
        );

        if let Some(outcome) = self.already_completed(job) {
            return outcome;
        }

        let mut metadata = StatusMetadata::default();
        let result = match self.admit(job) {
            Ok(_slot) => self.render(job, &mut metadata, started).await,
            Err(err) => Err(err),
        };
        // Slot released here, before persistence.

        let result = match result {
            Ok(result) => result,
            Err(err) => RenderResult::Failure {
                error_kind: err.kind(),
                message: err.public_message(),
                retryable: err.is_retryable(),
            },
        };
        self.finish(job, result, metadata)
    }

    /// A redelivered job whose completion is already stored is acknowledged as is.
    fn already_completed(&self, job: &Job) -> Option<JobOutcome> {
        let record = match self.status.get(&job.job_id) {
            Ok(Some(record)) if record.status == JobStatus::Completed => record,
            Ok(_) => return None,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Status lookup failed");
                return None;
            }
        };
        let artifacts = record.artifacts?;
        info!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            "Job already completed, acknowledging redelivery"
        );
        Some(JobOutcome {
            result: RenderResult::Success {
                artifacts,
                cost_tokens: record.cost_tokens.unwrap_or(0),
                cost_cents: record.cost_cents.unwrap_or(0),
                provider: record.provider.unwrap_or_default(),
                duration_ms: record.metadata.duration_ms.unwrap_or(0),
                cache_hit: record.metadata.cache_hit,
                coalesced: record.metadata.coalesced,
            },
            disposition: Disposition::Ack,
            persisted: true,
        })
    }

    fn admit(&self, job: &Job) -> Result<SlotGuard, RenderError> {
        let limit = self.config.tenant_limit(job.tenant_id.as_str());
        let slot = self.admission.acquire_slot(&job.tenant_id, limit)?;
        debug!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            active = self.admission.active_count(&job.tenant_id),
            limit,
            state = "admitted",
            "Job admitted"
        );

        let processing =
            StatusRecord::processing(job.job_id.clone(), job.tenant_id.clone(), job.attempt);
        match self.status.mark_processing(&processing) {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %job.job_id, "Completed status kept"),
            Err(e) => warn!(job_id = %job.job_id, error = %e, "Failed to mark job processing"),
        }
        Ok(slot)
    }

    /// Sanitize, then enhance and re-sanitize when a style is set.
    fn gate(&self, job: &Job) -> SanitizedPrompt {
        let max = self.config.prompt_max_length;
        let prompt = sanitize(&job.prompt, max);
        match job.options.style.as_deref() {
            Some(style) => prompt.enhance(style, max),
            None => prompt,
        }
    }

    async fn render(
        &self,
        job: &Job,
        metadata: &mut StatusMetadata,
        started: Instant,
    ) -> Result<RenderResult, RenderError> {
        let prompt = self.gate(job);
        metadata.prompt_hash = Some(prompt.hash().to_string());
        metadata.redactions = prompt.redactions().to_vec();

        if prompt.blocked() {
            let categories: Vec<&str> = prompt
                .redactions()
                .iter()
                .filter(|c| c.blocks())
                .map(|c| c.as_str())
                .collect();
            warn!(
                job_id = %job.job_id,
                tenant_id = %job.tenant_id,
                prompt_hash = prompt.hash(),
                categories = ?categories,
                "Prompt blocked by safety gate"
            );
            return Err(RenderError::PromptRejected(format!(
                "disallowed content ({})",
                categories.join(", ")
            )));
        }
        debug!(
            job_id = %job.job_id,
            prompt_hash = prompt.hash(),
            preview = %prompt.masked_preview(),
            redactions = prompt.redactions().len(),
            truncated = prompt.truncated(),
            "Prompt sanitized"
        );

        let key = CacheKey::derive(&KeyParts {
            tenant_id: &job.tenant_id,
            prompt: prompt.text(),
            style: job.options.style.as_deref(),
            size: job.options.target_size,
            quality: job.options.quality,
            base_image_uri: &job.base_image_uri,
            mask_uri: job.mask_uri.as_deref(),
            normal_map: job.options.generate_normal_map,
            roughness_map: job.options.generate_roughness_map,
        });

        if let Some(entry) = self.cache.get(&key) {
            debug!(job_id = %job.job_id, cache_key = %key, state = "cache-hit", "Cache hit");
            return Ok(success(entry, started, true, false, metadata));
        }

        debug!(job_id = %job.job_id, cache_key = %key, state = "generating", "Generating");
        let coalesced = self
            .coalescer
            .run(key, || self.generate(job, &prompt, key))
            .await;
        let generation = coalesced.result?;

        if generation.from_cache {
            return Ok(success(generation.entry, started, true, false, metadata));
        }
        if coalesced.leader {
            Ok(success(generation.entry, started, false, false, metadata))
        } else {
            // Only the leader pays for the shared generation.
            let mut entry = generation.entry;
            entry.cost_tokens = 0;
            entry.cost_cents = 0;
            Ok(success(entry, started, false, true, metadata))
        }
    }

    /// Leader work for one cache key: generate, check budget, derive, store, cache.
    async fn generate(
        &self,
        job: &Job,
        prompt: &SanitizedPrompt,
        key: CacheKey,
    ) -> Result<Generation, RenderError> {
        // A previous leader may have settled between our lookup and our claim.
        if let Some(entry) = self.cache.get(&key) {
            return Ok(Generation {
                entry,
                from_cache: true,
            });
        }

        let (base_image, mask) = self.fetch_references(job).await?;
        let request = GenerationRequest {
            base_image: &base_image,
            mask: mask.as_deref(),
            prompt: prompt.text(),
            quality: job.options.quality,
            size: job.options.target_size,
        };
        let image = self.orchestrator.generate(&request).await?;

        let limit = self.config.max_tokens_per_job;
        if image.tokens_used > limit {
            warn!(
                job_id = %job.job_id,
                provider = %image.provider,
                tokens_used = image.tokens_used,
                limit,
                "Token budget exceeded, discarding result"
            );
            return Err(RenderError::TokenLimitExceeded {
                used: image.tokens_used,
                limit,
            });
        }

        debug!(
            job_id = %job.job_id,
            provider = %image.provider,
            state = "persisting",
            "Persisting artifacts"
        );
        let entry = self.persist(job, image).await?;
        self.cache.set(key, entry.clone(), None);
        Ok(Generation {
            entry,
            from_cache: false,
        })
    }

    async fn fetch_references(
        &self,
        job: &Job,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), RenderError> {
        let base = self.fetcher.fetch(&job.base_image_uri);
        match job.mask_uri.as_deref() {
            Some(mask_uri) => {
                let (base, mask) = try_join(base, self.fetcher.fetch(mask_uri)).await?;
                Ok((base, Some(mask)))
            }
            None => Ok((base.await?, None)),
        }
    }

    async fn persist(&self, job: &Job, image: GeneratedImage) -> Result<CacheEntry, RenderError> {
        let GeneratedImage {
            bytes,
            tokens_used,
            provider,
        } = image;

        let options = job.options.clone();
        let derive_provider = provider.clone();
        let derived = tokio::task::spawn_blocking(move || {
            let derived = derive_images(&bytes, &options, &derive_provider);
            (bytes, derived)
        })
        .await
        .map_err(|e| RenderError::Storage(format!("Artifact derivation task failed: {}", e)))?;
        let (bytes, derived) = derived;
        let derived = derived?;

        let stored =
            store_all(self.artifacts.as_ref(), &job.tenant_id, &job.job_id, &derived).await;
        let artifacts = match stored {
            Ok(artifacts) => artifacts,
            Err(e) => {
                // The generation is paid for; leave enough to find and replay it.
                error!(
                    job_id = %job.job_id,
                    tenant_id = %job.tenant_id,
                    provider = %provider,
                    tokens_used,
                    image_bytes = bytes.len(),
                    image_blake3 = %blake3::hash(&bytes).to_hex(),
                    error = %e,
                    "Artifact storage failed after successful generation"
                );
                return Err(e.into());
            }
        };

        Ok(CacheEntry {
            artifacts,
            cost_cents: cost_cents(&provider, tokens_used),
            provider,
            width: derived.width,
            height: derived.height,
            cost_tokens: tokens_used,
            created_at_ms: now_millis(),
        })
    }

    /// Persist the terminal status, publish the event and pick the queue disposition.
    fn finish(&self, job: &Job, result: RenderResult, metadata: StatusMetadata) -> JobOutcome {
        let record = StatusRecord::terminal(
            job.job_id.clone(),
            job.tenant_id.clone(),
            job.attempt,
            &result,
            metadata,
        );

        let persisted = match self.status.write_terminal(&record) {
            Ok(TerminalWrite::AlreadyCompleted) => {
                debug!(job_id = %job.job_id, "Completed status kept over later result");
                true
            }
            Ok(_) => true,
            Err(e) => {
                error!(
                    job_id = %job.job_id,
                    tenant_id = %job.tenant_id,
                    error = %e,
                    "Failed to write terminal status"
                );
                false
            }
        };

        if !persisted {
            // Not terminal; the queue's redelivery resolves it.
            return JobOutcome {
                result,
                disposition: Disposition::Retry {
                    after: Duration::from_millis(self.config.failure_retry_backoff_ms),
                },
                persisted,
            };
        }

        if let Err(e) = self.events.publish(RenderEvent::for_result(job, &result)) {
            warn!(job_id = %job.job_id, error = %e, "Failed to publish render event");
        }

        let disposition = self.disposition(job, &result);
        match &result {
            RenderResult::Success {
                provider,
                cost_tokens,
                cost_cents,
                duration_ms,
                cache_hit,
                coalesced,
                ..
            } => info!(
                job_id = %job.job_id,
                tenant_id = %job.tenant_id,
                provider = %provider,
                cost_tokens,
                cost_cents,
                duration_ms,
                cache_hit,
                coalesced,
                state = "completed",
                "Render completed"
            ),
            RenderResult::Failure {
                error_kind,
                message,
                retryable,
            } => error!(
                job_id = %job.job_id,
                tenant_id = %job.tenant_id,
                attempt = job.attempt,
                error_kind = %error_kind,
                error = %message,
                retryable,
                disposition = ?disposition,
                state = "failed",
                "Render failed"
            ),
        }

        JobOutcome {
            result,
            disposition,
            persisted,
        }
    }

    fn disposition(&self, job: &Job, result: &RenderResult) -> Disposition {
        match result {
            RenderResult::Success { .. } => Disposition::Ack,
            RenderResult::Failure {
                retryable: false, ..
            } => Disposition::DeadLetter,
            RenderResult::Failure { .. } if job.attempt >= self.config.max_attempts => {
                Disposition::DeadLetter
            }
            RenderResult::Failure { error_kind, .. } => {
                let backoff_ms = if *error_kind == ErrorKind::ConcurrencyLimitExceeded {
                    self.config.concurrency_retry_backoff_ms
                } else {
                    self.config.failure_retry_backoff_ms
                };
                Disposition::Retry {
                    after: Duration::from_millis(backoff_ms),
                }
            }
        }
    }
}

fn success(
    entry: CacheEntry,
    started: Instant,
    cache_hit: bool,
    coalesced: bool,
    metadata: &mut StatusMetadata,
) -> RenderResult {
    metadata.dimensions = Some(format!("{}x{}", entry.width, entry.height));
    let (cost_tokens, cost_cents) = if cache_hit {
        (0, 0)
    } else {
        (entry.cost_tokens, entry.cost_cents)
    };
    RenderResult::Success {
        artifacts: entry.artifacts,
        cost_tokens,
        cost_cents,
        provider: entry.provider,
        duration_ms: started.elapsed().as_millis() as u64,
        cache_hit,
        coalesced,
    }
}
