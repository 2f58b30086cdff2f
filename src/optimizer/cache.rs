//! Time-bounded response cache keyed by request fingerprint.
//!
//! Expiry is lazy: an entry is only checked, and evicted, when it is looked up.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

/// A buffered response and the moment it was stored.
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) > self.ttl
    }
}

/// Number of cached responses and their approximate serialized size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub count: usize,
    /// Sum of the compact JSON length of every cached response, in bytes.
    pub size: usize,
}

/// Concurrent response cache. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached data if it is still fresh, evicting it otherwise.
    ///
    /// An entry stored at `t` with time-to-live `T` is fresh up to and
    /// including `t + T`.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.data.clone());
            }
            // Drop the read guard before removing, DashMap would deadlock otherwise
            drop(entry);
            self.entries
                .remove_if(key, |_, entry| entry.is_expired(now));
            tracing::debug!(key = %key, "Evicted expired cache entry");
        }

        None
    }

    /// Stores data under `key`, replacing any previous entry.
    pub fn store(&self, key: impl Into<String>, data: Value, ttl: Duration) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                data,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Computes entry count and approximate size. Expired entries that have
    /// not been looked up yet are still counted.
    pub fn stats(&self) -> CacheStats {
        let size = self
            .entries
            .iter()
            .map(|entry| entry.data.to_string().len())
            .sum();

        CacheStats {
            count: self.entries.len(),
            size,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
