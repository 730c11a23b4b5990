//! Circuit Breaker
//!
//! Per-provider failure tracker. `closed` passes calls through; `threshold` consecutive
//! failures open the circuit; while open, calls fail fast with
//! [`RenderError::CircuitOpen`] and never reach the upstream. Once `timeout` has elapsed
//! since the last failure, the next call is let through as a single half-open trial: its
//! success closes the circuit, its failure reopens it.
//!
//! There is no background timer. The open to half-open transition is a function of the
//! time since the last failure, evaluated when [`CircuitBreaker::execute`] is called.

use crate::config::BreakerConfig;
use crate::error::RenderError;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker guarding one provider
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::new(name, config.failure_threshold, config.open_timeout())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `call` through the breaker.
    ///
    /// Every `Err` from `call` counts as a failure. A fast-fail returns
    /// [`RenderError::CircuitOpen`] without invoking `call` and does not count.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, RenderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RenderError>>,
    {
        let mut guard = self.admit()?;
        let result = call().await;
        guard.finished = true;
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        result
    }

    /// Effective state at this instant, without transitioning.
    pub fn state(&self) -> BreakerState {
        self.snapshot().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let state = match inner.state {
            BreakerState::Open if self.timeout_elapsed(&inner, Instant::now()) => {
                BreakerState::HalfOpen
            }
            other => other,
        };
        BreakerSnapshot {
            state,
            consecutive_failures: inner.consecutive_failures,
            last_failure: inner.last_failure,
        }
    }

    fn timeout_elapsed(&self, inner: &BreakerInner, now: Instant) -> bool {
        inner
            .last_failure
            .map(|at| now.saturating_duration_since(at) >= self.timeout)
            .unwrap_or(true)
    }

    fn admit(&self) -> Result<CallGuard<'_>, RenderError> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(CallGuard::new(self, false)),
            BreakerState::Open => {
                if self.timeout_elapsed(&inner, Instant::now()) {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(provider = %self.name, "Circuit half-open, allowing trial call");
                    Ok(CallGuard::new(self, true))
                } else {
                    Err(self.open_error())
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(self.open_error())
                } else {
                    inner.trial_in_flight = true;
                    Ok(CallGuard::new(self, true))
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            info!(provider = %self.name, "Circuit closed after successful trial");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.trial_in_flight = false;

        let reopen = inner.state == BreakerState::HalfOpen;
        let trip = inner.state == BreakerState::Closed
            && inner.consecutive_failures >= self.threshold;
        if reopen || trip {
            inner.state = BreakerState::Open;
            warn!(
                provider = %self.name,
                consecutive_failures = inner.consecutive_failures,
                open_for_ms = self.timeout.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    fn open_error(&self) -> RenderError {
        RenderError::CircuitOpen {
            provider: self.name.clone(),
        }
    }
}

/// Frees the half-open trial slot if the call is dropped before it settles.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    finished: bool,
}

impl<'a> CallGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            finished: false,
        }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.trial && !self.finished {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}
