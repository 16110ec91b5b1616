//! Cache Entry Module
//!
//! Index metadata for a single cached payload.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// Metadata the index keeps for one payload.
///
/// The payload itself lives in its own file; the index only records when it
/// was written and how large it was so cleanup never has to read payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Write timestamp
    pub created_at: DateTime<Utc>,
    /// Byte length of the payload at write time
    pub size_bytes: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates metadata for `value` written at `now`.
    pub fn new(value: &str, now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            size_bytes: value.len() as u64,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has outlived `ttl`.
    ///
    /// An entry is expired only once its age strictly exceeds the TTL; an entry
    /// exactly `ttl` old is still served.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.created_at) > to_chrono(ttl)
    }
}

// == Utility Functions ==
/// Converts a std duration to chrono, saturating far beyond any real TTL.
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    let millis = i64::try_from(d.as_millis()).unwrap_or(i64::MAX / 2);
    chrono::Duration::milliseconds(millis.min(i64::MAX / 2))
}
