//! In-flight request coalescing.
//!
//! The first caller for a key becomes the leader and runs the work; later callers for the
//! same key register a waiter and receive a clone of the leader's result. The in-flight
//! entry is removed when the leader settles, whatever the outcome, and also when the
//! leader is dropped without settling, in which case waiters see
//! [`RenderError::CoalescedAbandoned`].

use super::key::CacheKey;
use crate::error::RenderError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

type Waiter<T> = oneshot::Sender<Result<T, RenderError>>;

/// Result of a coalesced call
#[derive(Debug)]
pub struct Coalesced<T> {
    pub result: Result<T, RenderError>,
    /// True when this caller ran the work itself
    pub leader: bool,
}

/// Map of in-flight keys to the waiters parked on them
pub struct Coalescer<T> {
    in_flight: Mutex<HashMap<CacheKey, Vec<Waiter<T>>>>,
}

enum Claim<T: Clone> {
    Leader(LeaderGuard<T>),
    Waiter(oneshot::Receiver<Result<T, RenderError>>),
}

/// Removes the in-flight entry when the leader settles or unwinds.
struct LeaderGuard<T: Clone> {
    coalescer: Arc<Coalescer<T>>,
    key: CacheKey,
    settled: bool,
}

impl<T: Clone> Coalescer<T> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently being generated.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Run `work` for `key` unless an identical call is already in flight, in which case
    /// wait for that call's result instead.
    pub async fn run<F, Fut>(self: &Arc<Self>, key: CacheKey, work: F) -> Coalesced<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RenderError>>,
    {
        match self.claim(key) {
            Claim::Leader(guard) => {
                let result = work().await;
                guard.settle(&result);
                Coalesced {
                    result,
                    leader: true,
                }
            }
            Claim::Waiter(receiver) => {
                debug!(cache_key = %key, "Joined in-flight generation");
                let result = receiver
                    .await
                    .unwrap_or(Err(RenderError::CoalescedAbandoned));
                Coalesced {
                    result,
                    leader: false,
                }
            }
        }
    }

    fn claim(self: &Arc<Self>, key: CacheKey) -> Claim<T> {
        let mut in_flight = self.in_flight.lock();
        if let Some(waiters) = in_flight.get_mut(&key) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            return Claim::Waiter(rx);
        }
        in_flight.insert(key, Vec::new());
        Claim::Leader(LeaderGuard {
            coalescer: Arc::clone(self),
            key,
            settled: false,
        })
    }

    fn take_waiters(&self, key: &CacheKey) -> Vec<Waiter<T>> {
        self.in_flight.lock().remove(key).unwrap_or_default()
    }
}

impl<T: Clone> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> LeaderGuard<T> {
    fn settle(mut self, result: &Result<T, RenderError>) {
        self.settled = true;
        let waiters = self.coalescer.take_waiters(&self.key);
        if !waiters.is_empty() {
            debug!(cache_key = %self.key, waiters = waiters.len(), "Fanning out coalesced result");
        }
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
    }
}

impl<T: Clone> Drop for LeaderGuard<T> {
    fn drop(&mut self) {
        if !self.settled {
            // Dropping the senders wakes every waiter with a closed channel.
            drop(self.coalescer.take_waiters(&self.key));
        }
    }
}
