//! Retry Module
//!
//! Classifies remote failures and drives bounded, jittered retries.

mod backoff;
mod classify;
mod invoker;

pub use backoff::{Backoff, MAX_DELAY};
pub use classify::{mentions_quota, ErrorClass};
pub use invoker::{InvokeFailure, InvokeOutcome, ResilientInvoker, RetryAttempt, RetryPolicy};
