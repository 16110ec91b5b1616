//! Error types for infra_lens
//!
//! Provides unified error handling using thiserror.

use std::path::PathBuf;

use thiserror::Error;

// == Cache Error Enum ==
/// Failures of the persistent cache layer.
///
/// These never escape [`CacheStore`](crate::cache::CacheStore)'s public
/// operations; they are logged and the operation degrades to a miss.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Read, write, rename or delete failed on the cache directory
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Payload or metadata no longer matches what the index recorded
    #[error("Corrupted cache entry {key}: {reason}")]
    Corrupted { key: String, reason: String },

    /// Index file could not be encoded or decoded
    #[error("Cache index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cross-process lock file stayed held for too long
    #[error("Timed out waiting for cache lock {0}")]
    LockTimeout(PathBuf),
}

impl CacheError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

// == Remote Error Enum ==
/// Failures reported by the remote summarization service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Service asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Account quota or billing is exhausted
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Credentials rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Service returned an error status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Request never got a response
    #[error("Network error: {0}")]
    Network(String),

    /// Response arrived but could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Anything else
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

// == Config Error Enum ==
/// Configuration loading and validation failures.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    /// Required setting is not present
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// Setting is present but unusable
    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

// == Result Type Alias ==
/// Convenience Result type for cache internals.
pub type Result<T> = std::result::Result<T, CacheError>;
