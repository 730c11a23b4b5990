//! Generation cache and request coalescing.
//!
//! Successful generations are stored under their [`CacheKey`] with a bounded lifetime.
//! Expiry is lazy: a stale entry is dropped when a lookup finds it, no sweeper runs.
//! Failures are never stored; only [`GenerationCache::set`] writes, and callers invoke it
//! after a generation succeeded.

pub mod coalesce;
pub mod key;

pub use coalesce::{Coalesced, Coalescer};
pub use key::{CacheKey, KeyParts};

use crate::types::RenderArtifacts;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Cached outcome of one successful generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub artifacts: RenderArtifacts,
    pub provider: String,
    pub width: u32,
    pub height: u32,
    pub cost_tokens: u64,
    pub cost_cents: u64,
    pub created_at_ms: u64,
}

struct StoredEntry {
    entry: CacheEntry,
    expires_at: Instant,
}

/// In-process cache of successful generations
pub struct GenerationCache {
    entries: RwLock<HashMap<CacheKey, StoredEntry>>,
    default_ttl: Duration,
}

impl GenerationCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Look up a live entry. Has no effect on providers.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(stored) if stored.expires_at > now => return Some(stored.entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop it, unless a concurrent set refreshed it meanwhile.
        let mut entries = self.entries.write();
        if entries
            .get(key)
            .map(|stored| stored.expires_at <= now)
            .unwrap_or(false)
        {
            entries.remove(key);
        }
        None
    }

    /// Store a successful generation. `ttl` defaults to the cache's configured lifetime.
    pub fn set(&self, key: CacheKey, entry: CacheEntry, ttl: Option<Duration>) {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        self.entries
            .write()
            .insert(key, StoredEntry { entry, expires_at });
    }

    /// Number of stored entries, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
