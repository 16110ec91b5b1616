//! Cache Module
//!
//! Provides a persistent on-disk cache with TTL expiration and size-bounded,
//! oldest-first eviction.

pub mod clock;
mod entry;
pub mod fingerprint;
pub mod index;
mod stats;
mod store;


// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::CacheEntry;
pub use fingerprint::fingerprint;
pub use index::{CacheIndex, CleanupPlan, IndexStore};
pub use stats::{CacheStats, CacheStatsReport};
pub use store::{CacheStore, CleanupReport};
