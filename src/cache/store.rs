//! Cache Store Module
//!
//! Persistent, size-bounded, expiring key → payload storage.
//!
//! The store is an optimization layer: none of its public operations return
//! errors. I/O problems are logged and the operation degrades to a miss or a
//! dropped write so callers simply recompute.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::index::{IndexStore, IndexTxn};
use crate::cache::stats::Counters;
use crate::cache::{CacheEntry, CacheStats};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Cleanup Report ==
/// What a cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Entries dropped for exceeding the TTL
    pub expired: usize,
    /// Entries dropped to get back under the size ceiling
    pub evicted: usize,
    /// Files in the directory that no entry referenced
    pub orphans: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.expired + self.evicted + self.orphans
    }
}

// == Cache Store ==
/// Persistent cache with TTL expiry and oldest-first eviction.
#[derive(Debug)]
pub struct CacheStore {
    /// On-disk index and payloads
    index: IndexStore,
    /// Source of `created_at` and expiry checks
    clock: Arc<dyn Clock>,
    /// Maximum entry age
    ttl: Duration,
    /// Ceiling on summed payload sizes
    max_size_bytes: u64,
    /// Process-local hit/miss/eviction counters
    counters: Counters,
}

impl CacheStore {
    // == Constructor ==
    /// Opens the cache directory named by `config`.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Opens the cache with a custom time source.
    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let index = IndexStore::open(&config.dir)?;
        debug!(
            "Cache opened at {} (ttl={}s, max_size={} bytes)",
            index.dir().display(),
            config.ttl.as_secs(),
            config.max_size_bytes
        );
        Ok(Self {
            index,
            clock,
            ttl: config.ttl,
            max_size_bytes: config.max_size_bytes,
            counters: Counters::default(),
        })
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Expired, missing and corrupted entries are purged and reported as
    /// absent, so a read may rewrite the index.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.try_get(key) {
            Ok(Some(value)) => {
                self.counters.record_hit();
                Some(value)
            }
            Ok(None) => {
                self.counters.record_miss();
                None
            }
            Err(e) => {
                warn!("Cache read failed for key {}: {}", key, e);
                self.counters.record_miss();
                None
            }
        }
    }

    /// Fallible form of [`get`](Self::get).
    pub fn try_get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let ttl = self.ttl;

        self.index.with_lock(|txn| {
            let Some(entry) = txn.index().get(key).cloned() else {
                return Ok(None);
            };

            if entry.is_expired(now, ttl) {
                debug!("Cache entry {} expired, removing", key);
                txn.remove(key);
                return Ok(None);
            }

            match read_verified(txn, key, &entry)? {
                Ok(value) => Ok(Some(value)),
                Err(corrupted) => {
                    warn!("{}; purging", corrupted);
                    txn.remove(key);
                    Ok(None)
                }
            }
        })
    }

    // == Put ==
    /// Stores `value` under `key`, replacing any previous entry, then runs a
    /// cleanup pass.
    ///
    /// Returns false if the write could not be persisted.
    pub fn put(&self, key: &str, value: &str) -> bool {
        match self.try_put(key, value) {
            Ok(report) => {
                if report.total() > 0 {
                    debug!(
                        "Cache cleanup after put: {} expired, {} evicted",
                        report.expired, report.evicted
                    );
                }
                true
            }
            Err(e) => {
                warn!("Cache write failed for key {}: {}", key, e);
                false
            }
        }
    }

    /// Fallible form of [`put`](Self::put).
    pub fn try_put(&self, key: &str, value: &str) -> Result<CleanupReport> {
        let now = self.clock.now();

        self.index.with_lock(|txn| {
            txn.write(key, value, CacheEntry::new(value, now))?;
            Ok(self.cleanup(txn))
        })
    }

    // == Delete ==
    /// Removes an entry; no-op if absent.
    ///
    /// Returns true if an entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        match self.index.with_lock(|txn| Ok(txn.remove(key).is_some())) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Cache delete failed for key {}: {}", key, e);
                false
            }
        }
    }

    // == Clear ==
    /// Removes every entry and payload file.
    ///
    /// Returns the number of entries dropped, or None if the directory could
    /// not be cleared.
    pub fn clear(&self) -> Option<usize> {
        match self.index.with_lock(|txn| txn.clear()) {
            Ok(count) => {
                info!("Cache cleared ({} entries)", count);
                Some(count)
            }
            Err(e) => {
                warn!("Failed to clear cache: {}", e);
                None
            }
        }
    }

    // == Stats ==
    /// Returns current cache statistics.
    ///
    /// If the index cannot be read the occupancy fields are zero.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let ttl = self.ttl;

        let mut stats = self
            .index
            .with_lock(|txn| {
                let index = txn.index();
                Ok(CacheStats {
                    total_entries: index.len(),
                    total_size_bytes: index.total_size_bytes(),
                    expired_entries: index.expired_count(now, ttl),
                    ..Default::default()
                })
            })
            .unwrap_or_else(|e| {
                warn!("Failed to read cache stats: {}", e);
                CacheStats::default()
            });

        stats.max_size_bytes = self.max_size_bytes;
        stats.ttl_secs = self.ttl.as_secs();
        self.counters.fill(&mut stats);
        stats
    }

    // == Sweep ==
    /// Runs the cleanup algorithm without a write and removes unreferenced
    /// payload files.
    pub fn sweep(&self) -> CleanupReport {
        let result = self.index.with_lock(|txn| {
            let mut report = self.cleanup(txn);
            report.orphans = txn.remove_orphans()?;
            Ok(report)
        });

        match result {
            Ok(report) => report,
            Err(e) => {
                warn!("Cache sweep failed: {}", e);
                CleanupReport::default()
            }
        }
    }

    // == Cleanup ==
    /// Expiry pass, then size pass, inside an already held lock.
    fn cleanup(&self, txn: &mut IndexTxn<'_>) -> CleanupReport {
        let plan = txn
            .index()
            .plan_cleanup(self.clock.now(), self.ttl, self.max_size_bytes);

        for key in plan.expired.iter().chain(plan.evicted.iter()) {
            txn.remove(key);
        }
        self.counters.record_evictions(plan.evicted.len());

        CleanupReport {
            expired: plan.expired.len(),
            evicted: plan.evicted.len(),
            orphans: 0,
        }
    }
}

/// Reads a payload and checks it against its entry.
///
/// The outer result carries I/O failures; the inner one reports a corrupted
/// or missing payload that should be purged.
fn read_verified(
    txn: &IndexTxn<'_>,
    key: &str,
    entry: &CacheEntry,
) -> Result<std::result::Result<String, CacheError>> {
    let corrupted = |reason: String| CacheError::Corrupted {
        key: key.to_string(),
        reason,
    };

    let Some(bytes) = txn.read_payload(key)? else {
        return Ok(Err(corrupted("payload file is missing".to_string())));
    };
    if bytes.len() as u64 != entry.size_bytes {
        return Ok(Err(corrupted(format!(
            "payload is {} bytes, index recorded {}",
            bytes.len(),
            entry.size_bytes
        ))));
    }
    Ok(String::from_utf8(bytes).map_err(|e| corrupted(format!("payload is not UTF-8: {}", e))))
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use std::fs;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn open_store(max_size_bytes: u64) -> (TempDir, Arc<ManualClock>, CacheStore) {
        let tmp = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let config = CacheConfig::new(tmp.path(), HOUR, max_size_bytes);
        let store = CacheStore::with_clock(&config, clock.clone()).unwrap();
        (tmp, clock, store)
    }

    #[test]
    fn test_store_new_is_empty() {
        let (_tmp, _clock, store) = open_store(1024);
        let stats = store.stats();

        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_size_bytes, 0);
        assert_eq!(stats.max_size_bytes, 1024);
        assert_eq!(stats.ttl_secs, 3600);
    }

    #[test]
    fn test_store_put_and_get() {
        let (_tmp, _clock, store) = open_store(1024);

        assert!(store.put("abc", "hello"));
        assert_eq!(store.get("abc").as_deref(), Some("hello"));
        assert_eq!(store.stats().total_entries, 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let (_tmp, _clock, store) = open_store(1024);
        assert!(store.get("nonexistent").is_none());
    }

    #[test]
    fn test_store_empty_value() {
        let (_tmp, _clock, store) = open_store(1024);

        assert!(store.put("empty", ""));
        assert_eq!(store.get("empty").as_deref(), Some(""));
    }

    #[test]
    fn test_store_arbitrary_key() {
        let (_tmp, _clock, store) = open_store(1024);

        assert!(store.put("../not a/file name", "v"));
        assert_eq!(store.get("../not a/file name").as_deref(), Some("v"));
    }

    #[test]
    fn test_store_overwrite_resets_timestamp() {
        let (_tmp, clock, store) = open_store(1024);

        store.put("k", "value1");
        clock.advance(Duration::from_secs(3000));
        store.put("k", "value2");
        clock.advance(Duration::from_secs(3000));

        // 6000s after the first write, 3000s after the second
        assert_eq!(store.get("k").as_deref(), Some("value2"));
        assert_eq!(store.stats().total_entries, 1);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let (_tmp, clock, store) = open_store(1024);

        store.put("abc", "hello");
        assert_eq!(store.get("abc").as_deref(), Some("hello"));

        clock.advance(Duration::from_secs(3601));
        assert!(store.get("abc").is_none());
        assert_eq!(store.stats().total_entries, 0);
    }

    #[test]
    fn test_stats_counts_expired_not_yet_purged() {
        let (_tmp, clock, store) = open_store(1024);

        store.put("a", "1");
        clock.advance(Duration::from_secs(3601));

        let stats = store.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.expired_entries, 1);
    }

    #[test]
    fn test_store_size_eviction_oldest_first() {
        let (_tmp, clock, store) = open_store(10);

        store.put("a", "12345");
        clock.advance(Duration::from_secs(1));
        store.put("b", "67890");
        clock.advance(Duration::from_secs(1));
        store.put("c", "X");

        let stats = store.stats();
        assert_eq!(stats.total_size_bytes, 6);
        assert_eq!(stats.evictions, 1);
        assert!(store.get("a").is_none());
        assert_eq!(store.get("b").as_deref(), Some("67890"));
        assert_eq!(store.get("c").as_deref(), Some("X"));
    }

    #[test]
    fn test_store_value_larger_than_ceiling_is_not_kept() {
        let (_tmp, _clock, store) = open_store(4);

        assert!(store.put("big", "12345"));
        assert!(store.get("big").is_none());
        assert_eq!(store.stats().total_size_bytes, 0);
    }

    #[test]
    fn test_put_purges_expired_entries() {
        let (_tmp, clock, store) = open_store(1024);

        store.put("old", "1");
        clock.advance(Duration::from_secs(4000));
        store.put("new", "2");

        let stats = store.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.expired_entries, 0);
    }

    #[test]
    fn test_store_delete() {
        let (_tmp, _clock, store) = open_store(1024);

        store.put("key1", "value1");
        assert!(store.delete("key1"));
        assert!(store.get("key1").is_none());
        assert!(!store.delete("key1"), "second delete is a no-op");
    }

    #[test]
    fn test_store_clear() {
        let (tmp, _clock, store) = open_store(1024);

        store.put("a", "1");
        store.put("b", "2");
        assert_eq!(store.clear(), Some(2));
        assert_eq!(store.stats().total_entries, 0);
        assert!(!tmp.path().join("a.cache").exists());
    }

    #[test]
    fn test_corrupted_payload_is_miss_and_purged() {
        let (tmp, _clock, store) = open_store(1024);

        store.put("abc", "hello");
        fs::write(tmp.path().join("abc.cache"), [0xff, 0xfe, 0xfd, 0xfc, 0xfb]).unwrap();

        assert!(store.get("abc").is_none());
        assert_eq!(store.stats().total_entries, 0);
    }

    #[test]
    fn test_truncated_payload_is_miss_and_purged() {
        let (tmp, _clock, store) = open_store(1024);

        store.put("abc", "hello");
        fs::write(tmp.path().join("abc.cache"), "hel").unwrap();

        assert!(store.get("abc").is_none());
        assert_eq!(store.stats().total_entries, 0);
    }

    #[test]
    fn test_missing_payload_is_miss_and_purged() {
        let (tmp, _clock, store) = open_store(1024);

        store.put("abc", "hello");
        fs::remove_file(tmp.path().join("abc.cache")).unwrap();

        assert!(store.get("abc").is_none());
        assert_eq!(store.stats().total_entries, 0);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(tmp.path(), HOUR, 1024);

        CacheStore::open(&config).unwrap().put("k", "persisted");
        let reopened = CacheStore::open(&config).unwrap();

        assert_eq!(reopened.get("k").as_deref(), Some("persisted"));
    }

    #[test]
    fn test_unavailable_directory_degrades_to_miss() {
        let (tmp, _clock, store) = open_store(1024);
        store.put("k", "v");

        // Replace the cache directory with a plain file
        fs::remove_dir_all(tmp.path()).unwrap();
        fs::write(tmp.path(), "not a directory").unwrap();

        assert!(store.get("k").is_none());
        assert!(!store.put("k", "v2"));
        assert!(!store.delete("k"));
        assert_eq!(store.stats().total_entries, 0);

        fs::remove_file(tmp.path()).unwrap();
    }

    #[test]
    fn test_sweep_removes_expired_and_orphans() {
        let (tmp, clock, store) = open_store(1024);

        store.put("a", "1");
        fs::write(tmp.path().join("stray.cache"), "x").unwrap();
        clock.advance(Duration::from_secs(3601));

        let report = store.sweep();
        assert_eq!(report.expired, 1);
        assert_eq!(report.orphans, 1);
        assert_eq!(store.stats().total_entries, 0);
    }

    #[test]
    fn test_stats_hits_and_misses() {
        let (_tmp, _clock, store) = open_store(1024);

        store.put("key1", "value1");
        store.get("key1");
        store.get("nonexistent");

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_concurrent_puts_keep_accounting_consistent() {
        let (_tmp, _clock, store) = open_store(1_000_000);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        assert!(store.put(&format!("t{}_{}", t, i), "0123456789"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = store.stats();
        assert_eq!(stats.total_entries, 160);
        assert_eq!(stats.total_size_bytes, 1600);
    }
}
