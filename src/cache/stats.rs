//! Cache Statistics Module
//!
//! Snapshot of cache occupancy plus this process's hit, miss and eviction counts.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time view of the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently in the index
    pub total_entries: usize,
    /// Sum of recorded payload sizes
    pub total_size_bytes: u64,
    /// Entries past their TTL but not yet purged
    pub expired_entries: usize,
    /// Configured size ceiling
    pub max_size_bytes: u64,
    /// Configured TTL in seconds
    pub ttl_secs: u64,
    /// Lookups served from the cache by this process
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Entries removed to stay under the size ceiling
    pub evictions: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Configured ceiling in mebibytes.
    pub fn max_size_mb(&self) -> f64 {
        self.max_size_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Current size in mebibytes.
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

// == Stats Report ==
/// [`CacheStats`] plus the derived figures, as printed by `cache-stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsReport {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_rate: f64,
    pub total_size_mb: f64,
    pub max_size_mb: f64,
}

impl From<CacheStats> for CacheStatsReport {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            total_size_mb: stats.total_size_mb(),
            max_size_mb: stats.max_size_mb(),
            stats,
        }
    }
}

// == Counters ==
/// Lock-free counters shared by all callers of one store.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Copies the counters into `stats`.
    pub fn fill(&self, stats: &mut CacheStats) {
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats.evictions = self.evictions.load(Ordering::Relaxed);
    }
}
