//! Tenant Admission
//!
//! Per-tenant concurrency slots. [`TenantAdmissionController::acquire_slot`] atomically
//! checks and increments the tenant's active counter and hands back a [`SlotGuard`] that
//! gives the slot back exactly once, on explicit release or on drop, so every exit path
//! of a job releases what it acquired.
//!
//! Counters expire `slot_ttl` after their last acquisition. A crashed worker therefore
//! cannot strand a tenant, and guards from an expired generation of a counter are ignored
//! on release instead of driving a fresh counter negative.

use crate::error::RenderError;
use crate::types::TenantId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Shared slot counters.
///
/// `try_acquire` must compare and increment as one atomic step; `release` must decrement
/// only the counter generation identified by `epoch`.
pub trait SlotStore: Send + Sync {
    /// Take a slot if fewer than `limit` are active. Returns the counter epoch on success.
    fn try_acquire(&self, tenant: &TenantId, limit: u32, ttl: Duration) -> Option<u64>;

    /// Give back one slot taken under `epoch`.
    fn release(&self, tenant: &TenantId, epoch: u64);

    /// Active slots for `tenant`; expired counters read as zero.
    fn active(&self, tenant: &TenantId) -> u32;
}

#[derive(Debug)]
struct Counter {
    active: u32,
    epoch: u64,
    expires_at: Instant,
}

/// Process-local slot store
#[derive(Debug, Default)]
pub struct InMemorySlotStore {
    counters: Mutex<HashMap<TenantId, Counter>>,
    next_epoch: AtomicU64,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStore for InMemorySlotStore {
    fn try_acquire(&self, tenant: &TenantId, limit: u32, ttl: Duration) -> Option<u64> {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        let counter = counters.entry(tenant.clone()).or_insert_with(|| Counter {
            active: 0,
            epoch: self.next_epoch.fetch_add(1, Ordering::Relaxed),
            expires_at: now + ttl,
        });
        if counter.expires_at <= now {
            if counter.active > 0 {
                warn!(
                    tenant_id = %tenant,
                    leaked = counter.active,
                    "Tenant slot counter expired with active slots; resetting"
                );
            }
            counter.active = 0;
            counter.epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        }
        if counter.active >= limit {
            return None;
        }
        counter.active += 1;
        counter.expires_at = now + ttl;
        Some(counter.epoch)
    }

    fn release(&self, tenant: &TenantId, epoch: u64) {
        let mut counters = self.counters.lock();
        let Some(counter) = counters.get_mut(tenant) else {
            return;
        };
        if counter.epoch != epoch || counter.active == 0 {
            debug!(tenant_id = %tenant, "Ignoring release for expired slot generation");
            return;
        }
        counter.active -= 1;
        if counter.active == 0 {
            counters.remove(tenant);
        }
    }

    fn active(&self, tenant: &TenantId) -> u32 {
        let now = Instant::now();
        self.counters
            .lock()
            .get(tenant)
            .filter(|counter| counter.expires_at > now)
            .map(|counter| counter.active)
            .unwrap_or(0)
    }
}

/// Admission control over tenant slots
#[derive(Clone)]
pub struct TenantAdmissionController {
    store: Arc<dyn SlotStore>,
    slot_ttl: Duration,
}

impl TenantAdmissionController {
    pub fn new(store: Arc<dyn SlotStore>, slot_ttl: Duration) -> Self {
        Self { store, slot_ttl }
    }

    /// Controller backed by a fresh in-memory store.
    pub fn in_memory(slot_ttl: Duration) -> Self {
        Self::new(Arc::new(InMemorySlotStore::new()), slot_ttl)
    }

    /// Take one of `tenant`'s `limit` slots.
    pub fn acquire_slot(&self, tenant: &TenantId, limit: u32) -> Result<SlotGuard, RenderError> {
        match self.store.try_acquire(tenant, limit, self.slot_ttl) {
            Some(epoch) => {
                debug!(tenant_id = %tenant, limit, "Tenant slot acquired");
                Ok(SlotGuard {
                    store: Arc::clone(&self.store),
                    tenant: tenant.clone(),
                    epoch,
                    released: false,
                })
            }
            None => Err(RenderError::ConcurrencyLimitExceeded {
                tenant: tenant.to_string(),
                limit,
            }),
        }
    }

    pub fn active_count(&self, tenant: &TenantId) -> u32 {
        self.store.active(tenant)
    }
}

/// One acquired tenant slot; released exactly once.
pub struct SlotGuard {
    store: Arc<dyn SlotStore>,
    tenant: TenantId,
    epoch: u64,
    released: bool,
}

impl SlotGuard {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Release now rather than at end of scope.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.store.release(&self.tenant, self.epoch);
            debug!(tenant_id = %self.tenant, "Tenant slot released");
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("tenant", &self.tenant)
            .field("epoch", &self.epoch)
            .field("released", &self.released)
            .finish()
    }
}
