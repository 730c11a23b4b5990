//! Shared test utilities for integration tests
//!
//! Scripted providers, a static reference fetcher and a fully wired processor over
//! temporary storage. Nothing here touches the network.

use async_trait::async_trait;
use parking_lot::Mutex;
use render_worker::assets::{AssetFetcher, FsArtifactStore};
use render_worker::config::{BreakerConfig, PipelineConfig};
use render_worker::error::RenderError;
use render_worker::events::{ChannelEventPublisher, EventEnvelope};
use render_worker::job::{Job, RenderOptions};
use render_worker::orchestrator::ProviderOrchestrator;
use render_worker::processor::JobProcessor;
use render_worker::provider::{GeneratedImage, GenerationRequest, ImageProvider};
use render_worker::status::SledStatusStore;
use render_worker::types::{JobId, TenantId};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Semaphore;

pub const PRIMARY: &str = "openai";
pub const FALLBACK: &str = "local-diffusion";

/// Small PNG with a gradient, decodable by the derive step.
pub fn png(size: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(size, size, |x, y| {
        image::Rgb([(x * 255 / size) as u8, (y * 255 / size) as u8, 128])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[derive(Debug, Clone, Copy)]
pub enum Step {
    Succeed { tokens: u64 },
    Fail,
    Hang,
}

/// Provider that plays a script of outcomes, then repeats a default.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Step>>,
    default: Step,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    requires_mask: bool,
}

impl ScriptedProvider {
    pub fn new(name: &str, default: Step) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
            gate: None,
            requires_mask: false,
        }
    }

    pub fn succeeding(name: &str, tokens: u64) -> Self {
        Self::new(name, Step::Succeed { tokens })
    }

    /// Play `steps` before falling back to the default.
    pub fn then(self, steps: &[Step]) -> Self {
        self.script.lock().extend(steps.iter().copied());
        self
    }

    /// Each call waits for one permit from `gate` before producing its outcome.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn requiring_mask(mut self) -> Self {
        self.requires_mask = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, request: &GenerationRequest<'_>) -> bool {
        !self.requires_mask || request.mask.is_some()
    }

    async fn generate(
        &self,
        _request: &GenerationRequest<'_>,
    ) -> Result<GeneratedImage, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let step = self.script.lock().pop_front().unwrap_or(self.default);
        match step {
            Step::Succeed { tokens } => Ok(GeneratedImage {
                bytes: png(8),
                tokens_used: tokens,
                provider: self.name.clone(),
            }),
            Step::Fail => Err(RenderError::provider(&self.name, "scripted failure")),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Serves the same small PNG for every reference URI.
#[derive(Default)]
pub struct StaticFetcher {
    pub fetches: AtomicUsize,
}

#[async_trait]
impl AssetFetcher for StaticFetcher {
    async fn fetch(&self, _uri: &str) -> Result<Vec<u8>, RenderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(png(4))
    }
}

/// Processor wired to scripted providers, sled status and filesystem artifacts.
pub struct Harness {
    pub processor: Arc<JobProcessor>,
    pub status: Arc<SledStatusStore>,
    pub events: UnboundedReceiver<EventEnvelope>,
    pub artifact_root: PathBuf,
    _dir: TempDir,
}

impl Harness {
    pub fn new(
        config: PipelineConfig,
        primary: Option<Arc<ScriptedProvider>>,
        fallback: Arc<ScriptedProvider>,
        request_timeout: Duration,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let artifact_root = dir.path().join("artifacts");
        let status = SledStatusStore::open(&dir.path().join("status")).unwrap();
        let (publisher, events) = ChannelEventPublisher::new_pair();

        let orchestrator = ProviderOrchestrator::new(
            primary.map(|p| p as Arc<dyn ImageProvider>),
            fallback,
            &config.circuit_breaker,
            request_timeout,
        )
        .with_dry_run(config.dry_run);

        let processor = JobProcessor::new(
            config,
            Arc::new(orchestrator),
            Arc::new(StaticFetcher::default()),
            Arc::new(FsArtifactStore::new(&artifact_root).unwrap()),
            status.clone(),
            Arc::new(publisher),
        );

        Self {
            processor: Arc::new(processor),
            status,
            events,
            artifact_root,
            _dir: dir,
        }
    }

    /// Fallback-only pipeline with default policy.
    pub fn with_fallback(fallback: Arc<ScriptedProvider>) -> Self {
        Self::new(PipelineConfig::default(), None, fallback, Duration::from_secs(5))
    }

    /// Every event published so far.
    pub fn drain_events(&mut self) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Ok(envelope) = self.events.try_recv() {
            events.push(envelope);
        }
        events
    }

    /// Number of files under the artifact root.
    pub fn artifact_count(&self) -> usize {
        fn count(dir: &std::path::Path) -> usize {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return 0;
            };
            entries
                .flatten()
                .map(|e| {
                    let path = e.path();
                    if path.is_dir() {
                        count(&path)
                    } else {
                        1
                    }
                })
                .sum()
        }
        count(&self.artifact_root)
    }
}

pub fn breaker(threshold: u32, open_timeout_ms: u64) -> BreakerConfig {
    BreakerConfig {
        failure_threshold: threshold,
        open_timeout_ms,
    }
}

/// Job with a mask, so a mask-requiring primary accepts it.
pub fn job(id: &str, tenant: &str, prompt: &str) -> Job {
    Job {
        job_id: JobId::new(id),
        tenant_id: TenantId::new(tenant),
        user_id: Some("user-1".to_string()),
        prompt: prompt.to_string(),
        base_image_uri: "file:///refs/base.png".to_string(),
        mask_uri: Some("file:///refs/mask.png".to_string()),
        options: RenderOptions::default(),
        attempt: 1,
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
