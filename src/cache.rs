//! Response caching with TTL expiry
//!
//! Thread-safe key-value cache for upstream API responses. Entries expire
//! after their per-entry TTL; expired entries are evicted lazily on read so
//! a stale value is never returned twice. No eviction policy beyond TTL.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

use crate::clock::{Clock, system_clock};

/// Thread-safe TTL cache for upstream responses
pub struct TtlCache {
    /// Cache entries keyed by caller-supplied opaque strings
    entries: DashMap<String, CacheEntry>,
    /// Cache statistics
    stats: CacheStats,
    /// Time source
    clock: Arc<dyn Clock>,
}

/// A cached value with TTL metadata
struct CacheEntry {
    /// The cached JSON value
    value: Value,
    /// When this entry was stored
    stored_at: Instant,
    /// Time-to-live duration
    ttl: Duration,
}

impl CacheEntry {
    /// Check if this entry has expired at `now`
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    /// Total cache hits
    hits: AtomicU64,
    /// Total cache misses (absent or expired)
    misses: AtomicU64,
    /// Total evictions (expired entries removed)
    evictions: AtomicU64,
}

impl TtlCache {
    /// Create a new empty cache on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Create a new empty cache on the given clock
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            stats: CacheStats::default(),
            clock,
        }
    }

    /// Get a cached value if it exists and hasn't expired.
    ///
    /// Expired entries are evicted on the spot and reported as misses.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            } else {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Store a value under `key`, overwriting unconditionally.
    ///
    /// The entry's TTL countdown restarts from now.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now(),
            ttl,
        };
        self.entries.insert(key.to_string(), entry);
    }

    /// Remove an entry, returning whether one was present
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Whether a live (non-expired) entry exists for `key`.
    ///
    /// An expired entry counts as absent and is evicted, same as [`get`](Self::get).
    pub fn exists(&self, key: &str) -> bool {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                false
            } else {
                true
            }
        } else {
            false
        }
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Evict expired entries (background maintenance)
    pub fn evict_expired(&self) {
        let now = self.clock.now();
        let keys_to_remove: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| {
                if entry.value().is_expired(now) {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();

        let count = keys_to_remove.len();
        for key in keys_to_remove {
            self.entries.remove(&key);
        }

        if count > 0 {
            self.stats
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };

        CacheStatsSnapshot {
            hits,
            misses,
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
            hit_rate,
        }
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total evictions
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}
