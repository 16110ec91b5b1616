//! Cache Sweep Task
//!
//! Background task that periodically expires and evicts cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;

/// Spawns a background task that periodically sweeps the cache.
///
/// Each run applies the same cleanup as a write (TTL expiry, then
/// oldest-first eviction down to the ceiling) and also removes orphaned
/// payload files. The sweep does blocking file I/O, so it runs on the
/// blocking pool.
///
/// # Arguments
/// * `cache` - Shared cache store
/// * `interval` - Time between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(300));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: Arc<CacheStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting cache sweep task with interval of {} seconds",
            interval.as_secs_f64()
        );

        loop {
            tokio::time::sleep(interval).await;

            let store = cache.clone();
            let report = match tokio::task::spawn_blocking(move || store.sweep()).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("Cache sweep did not complete: {}", e);
                    continue;
                }
            };

            if report.total() > 0 {
                info!(
                    "Cache sweep: {} expired, {} evicted, {} orphaned files removed",
                    report.expired, report.evicted, report.orphans
                );
            } else {
                debug!("Cache sweep: nothing to remove");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::config::CacheConfig;

    fn open_store(dir: &std::path::Path, clock: Arc<ManualClock>) -> Arc<CacheStore> {
        let config = CacheConfig::new(dir, Duration::from_secs(60), 1024);
        Arc::new(CacheStore::with_clock(&config, clock).unwrap())
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let cache = open_store(tmp.path(), clock.clone());

        cache.put("expire_soon", "value");
        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.stats().expired_entries, 1);

        let handle = spawn_cleanup_task(cache.clone(), Duration::from_millis(20));

        // Wait for at least one sweep
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 0, "Expired entry should have been swept");
        assert_eq!(stats.expired_entries, 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let cache = open_store(tmp.path(), clock);

        cache.put("long_lived", "value");

        let handle = spawn_cleanup_task(cache.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.get("long_lived").as_deref(), Some("value"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = open_store(tmp.path(), Arc::new(ManualClock::starting_now()));

        let handle = spawn_cleanup_task(cache, Duration::from_secs(1));

        // Abort immediately
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
