//! Background Tasks Module
//!
//! Contains background tasks that run while the summarizer is working.
//!
//! # Tasks
//! - Cache Sweep: expires and evicts cache entries at a configured interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
