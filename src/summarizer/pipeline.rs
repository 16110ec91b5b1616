//! Summarization pipeline: fingerprint, cache lookup, resilient call, cache write.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::config::AiConfig;
use crate::retry::ResilientInvoker;
use crate::summarizer::{DiffDocument, SummaryRequest, SummaryService};

/// Summary used when the diff has nothing to report.
pub const NO_CHANGES_SUMMARY: &str = "## No Infrastructure Changes Detected\n\n\
The infrastructure diff contains no created, updated, destroyed or replaced \
stacks or resources.\n\n\
If you expected changes, check that the diff step ran and wrote its output \
before this step.";

// == Summary Source ==
/// Where a summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummarySource {
    Cache,
    Generated,
    NoChanges,
    Failed,
}

impl SummarySource {
    pub fn as_str(self) -> &'static str {
        match self {
            SummarySource::Cache => "cache",
            SummarySource::Generated => "generated",
            SummarySource::NoChanges => "no-changes",
            SummarySource::Failed => "failed",
        }
    }
}

impl fmt::Display for SummarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Summary Report ==
/// Outcome of one pipeline run.
///
/// `summary` is always usable as-is: either summary text or a labeled
/// failure message.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub summary: String,
    pub source: SummarySource,
    /// Remote attempts made; zero for cache hits and empty diffs
    pub attempts: u32,
    pub fingerprint: Option<String>,
}

impl SummaryReport {
    pub fn is_success(&self) -> bool {
        self.source != SummarySource::Failed
    }
}

// == Summarizer ==
/// Composes the cache and the invoker around a [`SummaryService`].
///
/// The cache and the invoker never see each other; this type is the only
/// place they meet.
pub struct Summarizer<S> {
    service: S,
    cache: Option<Arc<CacheStore>>,
    invoker: ResilientInvoker,
    ai: AiConfig,
}

impl<S: SummaryService> Summarizer<S> {
    /// # Arguments
    /// * `service` - Remote summarization backend
    /// * `cache` - Shared cache, None when caching is disabled
    /// * `invoker` - Retry wrapper for remote calls
    /// * `ai` - Generation settings folded into each request
    pub fn new(
        service: S,
        cache: Option<Arc<CacheStore>>,
        invoker: ResilientInvoker,
        ai: AiConfig,
    ) -> Self {
        Self {
            service,
            cache,
            invoker,
            ai,
        }
    }

    pub fn cache(&self) -> Option<&Arc<CacheStore>> {
        self.cache.as_ref()
    }

    /// Summarizes `diff` without a cancellation signal.
    pub async fn summarize(&self, diff: &DiffDocument) -> SummaryReport {
        self.summarize_with_cancel(diff, &CancellationToken::new())
            .await
    }

    // == Summarize ==
    /// Returns a cached summary when one is fresh, otherwise generates and
    /// caches a new one.
    ///
    /// Failures are reported in the returned summary and never cached. A diff
    /// without changes yields [`NO_CHANGES_SUMMARY`] and touches neither the
    /// cache nor the remote service.
    pub async fn summarize_with_cancel(
        &self,
        diff: &DiffDocument,
        cancel: &CancellationToken,
    ) -> SummaryReport {
        if !diff.has_changes() {
            info!("No changes detected in diff");
            return SummaryReport {
                summary: NO_CHANGES_SUMMARY.to_string(),
                source: SummarySource::NoChanges,
                attempts: 0,
                fingerprint: None,
            };
        }

        let request = SummaryRequest::new(diff.clone(), &self.ai);
        let fingerprint = match request.fingerprint() {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                warn!("Could not fingerprint request, bypassing cache: {}", e);
                None
            }
        };

        let cache = self.cache.as_ref().zip(fingerprint.as_deref());

        if let Some((store, key)) = cache {
            if let Some(summary) = cache_get(store, key).await {
                info!("Using cached summary {}", key);
                return SummaryReport {
                    summary,
                    source: SummarySource::Cache,
                    attempts: 0,
                    fingerprint,
                };
            }
        }

        info!(
            "Generating summary for {} changed resources with {}",
            diff.changed_resource_count(),
            request.model
        );
        let outcome = self
            .invoker
            .invoke_with_cancel(|_| self.service.summarize(&request), cancel)
            .await;

        match outcome.result {
            Ok(summary) => {
                if let Some((store, key)) = cache {
                    if !cache_put(store, key, &summary).await {
                        warn!("Summary generated but not cached");
                    }
                }
                SummaryReport {
                    summary,
                    source: SummarySource::Generated,
                    attempts: outcome.attempts,
                    fingerprint,
                }
            }
            Err(failure) => {
                if let Some(error) = failure.last_error() {
                    warn!(
                        "Summary failed after {} attempts, last error was {}: {}",
                        failure.attempts(),
                        error.class(),
                        error
                    );
                }
                SummaryReport {
                    summary: failure.to_string(),
                    source: SummarySource::Failed,
                    attempts: outcome.attempts,
                    fingerprint,
                }
            }
        }
    }
}

// == Cache Access ==
// The store does blocking file I/O and may wait on another process's lock,
// so both calls run on the blocking pool.

async fn cache_get(store: &Arc<CacheStore>, key: &str) -> Option<String> {
    let store = Arc::clone(store);
    let key = key.to_string();
    match tokio::task::spawn_blocking(move || store.get(&key)).await {
        Ok(hit) => hit,
        Err(e) => {
            warn!("Cache lookup task failed, treating as a miss: {}", e);
            None
        }
    }
}

async fn cache_put(store: &Arc<CacheStore>, key: &str, summary: &str) -> bool {
    let store = Arc::clone(store);
    let key = key.to_string();
    let summary = summary.to_string();
    match tokio::task::spawn_blocking(move || store.put(&key, &summary)).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!("Cache write task failed, dropping the write: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::error::RemoteError;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted results, then repeats the last one.
    struct Scripted {
        results: Mutex<VecDeque<Result<String, RemoteError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(results: Vec<Result<String, RemoteError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SummaryService for Arc<Scripted> {
        async fn summarize(&self, _request: &SummaryRequest) -> Result<String, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.pop_front().unwrap()
            } else {
                results.front().cloned().unwrap()
            }
        }
    }

    fn changed_diff() -> DiffDocument {
        DiffDocument::from_json_str(
            r#"{"stacks": {"S": {"resources": {"Q": {"type": "AWS::SQS::Queue", "create": true}}}}}"#,
        )
        .unwrap()
    }

    fn summarizer(
        service: Arc<Scripted>,
        cache: Option<Arc<CacheStore>>,
        attempts: u32,
    ) -> Summarizer<Arc<Scripted>> {
        Summarizer::new(
            service,
            cache,
            ResilientInvoker::new(RetryPolicy::new(attempts)),
            AiConfig::default(),
        )
    }

    fn open_cache(dir: &std::path::Path) -> Arc<CacheStore> {
        let config = CacheConfig::new(dir, Duration::from_secs(3600), 1024 * 1024);
        Arc::new(CacheStore::open(&config).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_changes_skips_remote_and_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = open_cache(tmp.path());
        let service = Arc::new(Scripted::new(vec![Ok("unused".into())]));
        let pipeline = summarizer(service.clone(), Some(cache.clone()), 3);

        let report = pipeline.summarize(&DiffDocument::default()).await;

        assert_eq!(report.source, SummarySource::NoChanges);
        assert_eq!(report.summary, NO_CHANGES_SUMMARY);
        assert_eq!(service.calls(), 0);
        assert_eq!(cache.stats().total_entries, 0);
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_then_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = open_cache(tmp.path());
        let service = Arc::new(Scripted::new(vec![Ok("Adds a queue.".into())]));
        let pipeline = summarizer(service.clone(), Some(cache.clone()), 3);

        let first = pipeline.summarize(&changed_diff()).await;
        assert_eq!(first.source, SummarySource::Generated);
        assert_eq!(first.summary, "Adds a queue.");
        assert_eq!(first.attempts, 1);

        let second = pipeline.summarize(&changed_diff()).await;
        assert_eq!(second.source, SummarySource::Cache);
        assert_eq!(second.summary, "Adds a queue.");
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = open_cache(tmp.path());
        let service = Arc::new(Scripted::new(vec![Err(RemoteError::QuotaExceeded(
            "insufficient_quota".into(),
        ))]));
        let pipeline = summarizer(service.clone(), Some(cache.clone()), 3);

        let report = pipeline.summarize(&changed_diff()).await;

        assert_eq!(report.source, SummarySource::Failed);
        assert!(!report.is_success());
        assert_eq!(report.attempts, 1);
        assert_eq!(
            report.summary,
            "OpenAI API quota exceeded. Please check your billing and usage limits."
        );
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_generated() {
        let service = Arc::new(Scripted::new(vec![
            Err(RemoteError::RateLimited("slow down".into())),
            Err(RemoteError::RateLimited("slow down".into())),
            Ok("Third time lucky.".into()),
        ]));
        let pipeline = summarizer(service.clone(), None, 3);

        let report = pipeline.summarize(&changed_diff()).await;

        assert_eq!(report.source, SummarySource::Generated);
        assert_eq!(report.attempts, 3);
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_cache_always_recomputes() {
        let service = Arc::new(Scripted::new(vec![Ok("fresh".into())]));
        let pipeline = summarizer(service.clone(), None, 1);

        pipeline.summarize(&changed_diff()).await;
        pipeline.summarize(&changed_diff()).await;

        assert_eq!(service.calls(), 2);
        assert!(pipeline.cache().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_cache_degrades_to_recompute() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = open_cache(tmp.path());
        let service = Arc::new(Scripted::new(vec![Ok("still works".into())]));
        let pipeline = summarizer(service.clone(), Some(cache), 1);

        drop(tmp);
        let report = pipeline.summarize(&changed_diff()).await;

        assert_eq!(report.source, SummarySource::Generated);
        assert_eq!(report.summary, "still works");
    }

    #[tokio::test]
    async fn test_held_cache_lock_does_not_stall_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = open_cache(tmp.path());
        let service = Arc::new(Scripted::new(vec![Ok("after the wait".into())]));
        let pipeline = summarizer(service.clone(), Some(cache.clone()), 1);

        // Another process holds the lock for a while.
        let lock = tmp.path().join("cache.lock");
        std::fs::write(&lock, "other-holder").unwrap();

        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        let releaser = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let seen = ticks.load(Ordering::SeqCst);
                std::fs::remove_file(&lock).unwrap();
                seen
            })
        };

        let started = std::time::Instant::now();
        let report = pipeline.summarize(&changed_diff()).await;
        let ticks_while_held = releaser.await.unwrap();
        ticker.abort();

        assert!(ticks_while_held > 0, "runtime stalled while the lock was held");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.source, SummarySource::Generated);
        assert_eq!(report.summary, "after the wait");
        assert_eq!(cache.stats().total_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let service = Arc::new(Scripted::new(vec![Ok("never".into())]));
        let pipeline = summarizer(service.clone(), None, 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pipeline
            .summarize_with_cancel(&changed_diff(), &cancel)
            .await;

        assert_eq!(report.source, SummarySource::Failed);
        assert_eq!(report.summary, "AI summary cancelled after 0 attempts");
        assert_eq!(service.calls(), 0);
    }
}
