//! infra_lens - AI summaries of infrastructure diffs
//!
//! Caches summaries on disk with TTL expiry and a byte ceiling, and retries
//! the remote summarization service with jittered exponential backoff.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod output;
pub mod retry;
pub mod sink;
pub mod summarizer;
pub mod tasks;

pub use cache::{CacheStats, CacheStore};
pub use config::Config;
pub use retry::{ResilientInvoker, RetryPolicy};
pub use summarizer::{Summarizer, SummaryReport, SummarySource};
pub use tasks::spawn_cleanup_task;
