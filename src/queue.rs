//! Job Queue Consumer
//!
//! Pulls deliveries from a [`JobSource`], validates them at the boundary and runs them
//! through the [`JobProcessor`] on a fixed pool of workers. The pool size is the global
//! concurrency ceiling; per-tenant ceilings are enforced inside the processor.
//!
//! Malformed payloads are dead-lettered here and never reach the processor. Everything
//! else is acknowledged, redelivered after a delay, or dead-lettered according to the
//! processor's [`Disposition`].

use crate::error::RenderError;
use crate::job::{Job, JobPayload};
use crate::processor::{Disposition, JobProcessor};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// How long an idle worker waits for a delivery before re-checking for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One leased copy of a queued payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: u64,
    pub payload: Vec<u8>,
    /// 1-based delivery attempt, counted by the queue
    pub attempt: u32,
}

/// Source of job deliveries with at-least-once semantics
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Wait up to `wait` for the next ready delivery.
    async fn next(&self, wait: Duration) -> Option<Delivery>;

    /// Delivery finished; remove it.
    async fn ack(&self, delivery: &Delivery);

    /// Make the payload available again after `after`, as the next attempt.
    async fn retry(&self, delivery: Delivery, after: Duration);

    /// Park a delivery that must not be retried.
    async fn dead_letter(&self, delivery: Delivery, reason: &str);

    /// Deliveries waiting, ready or delayed.
    fn pending(&self) -> usize;

    /// Deliveries leased and not yet settled.
    fn in_flight(&self) -> usize;
}

/// A dead-lettered delivery and why
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub delivery: Delivery,
    pub reason: String,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    delayed: Vec<(Instant, Delivery)>,
    leased: HashSet<u64>,
    dead: Vec<DeadLetter>,
    acked: usize,
}

impl QueueState {
    /// Move delayed deliveries that are due onto the ready list, earliest first.
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|(at, _)| *at);
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        for (_, delivery) in self.delayed.drain(..due) {
            self.ready.push_back(delivery);
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }
}

/// In-process queue with delayed redelivery
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    next_id: AtomicU64,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue a raw payload as a first attempt.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().ready.push_back(Delivery {
            id,
            payload: payload.into(),
            attempt: 1,
        });
        self.notify.notify_one();
        id
    }

    /// Enqueue a job in its wire form.
    pub fn push_job(&self, job: &Job) -> Result<u64, RenderError> {
        let payload = serde_json::to_vec(&job.to_payload())
            .map_err(|e| RenderError::InvalidJob(format!("Failed to encode job: {}", e)))?;
        Ok(self.push(payload))
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().dead.clone()
    }

    pub fn acked(&self) -> usize {
        self.state.lock().acked
    }

    fn try_take(&self) -> Result<Delivery, Option<Instant>> {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        match state.ready.pop_front() {
            Some(delivery) => {
                state.leased.insert(delivery.id);
                Ok(delivery)
            }
            None => Err(state.next_due()),
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobSource for MemoryJobQueue {
    async fn next(&self, wait: Duration) -> Option<Delivery> {
        let deadline = Instant::now() + wait;
        loop {
            let next_due = match self.try_take() {
                Ok(delivery) => return Some(delivery),
                Err(next_due) => next_due,
            };
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        let mut state = self.state.lock();
        if state.leased.remove(&delivery.id) {
            state.acked += 1;
        }
    }

    async fn retry(&self, mut delivery: Delivery, after: Duration) {
        {
            let mut state = self.state.lock();
            state.leased.remove(&delivery.id);
            delivery.attempt += 1;
            state.delayed.push((Instant::now() + after, delivery));
        }
        self.notify.notify_one();
    }

    async fn dead_letter(&self, delivery: Delivery, reason: &str) {
        let mut state = self.state.lock();
        state.leased.remove(&delivery.id);
        state.dead.push(DeadLetter {
            delivery,
            reason: reason.to_string(),
        });
    }

    fn pending(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }

    fn in_flight(&self) -> usize {
        self.state.lock().leased.len()
    }
}

/// Consumer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Deliveries waiting in the source
    pub pending: usize,
    /// Jobs inside the processor right now
    pub processing: usize,
    pub completed: usize,
    /// Jobs that ended failed for good
    pub failed: usize,
    /// Deliveries handed back for redelivery
    pub retried: usize,
    /// Malformed payloads rejected at the boundary
    pub dead_lettered: usize,
}

struct Worker {
    id: usize,
    source: Arc<dyn JobSource>,
    processor: Arc<JobProcessor>,
    running: Arc<RwLock<bool>>,
    stats: Arc<RwLock<QueueStats>>,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = self.id, "Worker started");
        while *self.running.read() {
            let Some(delivery) = self.source.next(POLL_INTERVAL).await else {
                continue;
            };
            self.handle(delivery).await;
        }
        debug!(worker_id = self.id, "Worker stopped");
    }

    async fn handle(&self, delivery: Delivery) {
        let mut job = match JobPayload::decode(&delivery.payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(
                    worker_id = self.id,
                    delivery_id = delivery.id,
                    error = %e,
                    "Rejected malformed job payload"
                );
                self.stats.write().dead_lettered += 1;
                self.source.dead_letter(delivery, &e.to_string()).await;
                return;
            }
        };
        job.attempt = job.attempt.max(delivery.attempt);

        self.stats.write().processing += 1;
        let outcome = self.processor.process(&job).await;
        {
            let mut stats = self.stats.write();
            stats.processing = stats.processing.saturating_sub(1);
            match outcome.disposition {
                Disposition::Ack => stats.completed += 1,
                Disposition::Retry { .. } => stats.retried += 1,
                Disposition::DeadLetter => stats.failed += 1,
            }
        }

        match outcome.disposition {
            Disposition::Ack => self.source.ack(&delivery).await,
            Disposition::Retry { after } => {
                debug!(
                    worker_id = self.id,
                    job_id = %job.job_id,
                    attempt = job.attempt,
                    after_ms = after.as_millis() as u64,
                    "Scheduling redelivery"
                );
                self.source.retry(delivery, after).await;
            }
            Disposition::DeadLetter => {
                let reason = outcome
                    .error_kind()
                    .map(|kind| kind.as_str())
                    .unwrap_or("failed");
                self.source.dead_letter(delivery, reason).await;
            }
        }
    }
}

/// Fixed worker pool draining a [`JobSource`]
pub struct QueueConsumer {
    source: Arc<dyn JobSource>,
    processor: Arc<JobProcessor>,
    worker_count: usize,
    workers: RwLock<Vec<JoinHandle<()>>>,
    running: Arc<RwLock<bool>>,
    stats: Arc<RwLock<QueueStats>>,
}

impl QueueConsumer {
    pub fn new(source: Arc<dyn JobSource>, processor: Arc<JobProcessor>, workers: usize) -> Self {
        Self {
            source,
            processor,
            worker_count: workers.max(1),
            workers: RwLock::new(Vec::new()),
            running: Arc::new(RwLock::new(false)),
            stats: Arc::new(RwLock::new(QueueStats::default())),
        }
    }

    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.write();
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let mut workers = self.workers.write();
        for id in 0..self.worker_count {
            let worker = Worker {
                id,
                source: Arc::clone(&self.source),
                processor: Arc::clone(&self.processor),
                running: Arc::clone(&self.running),
                stats: Arc::clone(&self.stats),
            };
            workers.push(tokio::spawn(worker.run()));
        }
        info!(worker_count = workers.len(), "Started render queue workers");
    }

    /// Stop taking deliveries and wait for in-progress jobs to finish.
    pub async fn stop(&self) {
        let mut running = self.running.write();
        if !*running {
            return;
        }
        *running = false;
        drop(running);

        let workers = std::mem::take(&mut *self.workers.write());
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Queue worker ended abnormally");
            }
        }
        info!("Stopped render queue workers");
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = self.stats.read().clone();
        stats.pending = self.source.pending();
        stats
    }

    /// Wait until the source holds nothing and no job is in progress.
    pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<(), RenderError> {
        let start = Instant::now();
        loop {
            if self.source.pending() == 0
                && self.source.in_flight() == 0
                && self.stats.read().processing == 0
            {
                return Ok(());
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(RenderError::Config(
                        "Timeout waiting for queue to drain".to_string(),
                    ));
                }
            }
            sleep(Duration::from_millis(20)).await;
        }
    }
}
