//! Failure classification for remote calls.

use std::fmt;

use crate::error::RemoteError;

// == Error Class ==
/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Service throttled the request
    RateLimited,
    /// Account quota or billing exhausted
    QuotaExceeded,
    /// Service or network hiccup
    TransientService,
    /// Caller-side or account problem that retrying cannot fix
    NonRetryable,
}

impl ErrorClass {
    /// Whether another attempt could succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::RateLimited | ErrorClass::TransientService)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "rate-limited",
            ErrorClass::QuotaExceeded => "quota-exceeded",
            ErrorClass::TransientService => "transient-service-error",
            ErrorClass::NonRetryable => "non-retryable",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True if an error message talks about quota or billing limits.
pub fn mentions_quota(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("quota") || lower.contains("billing")
}

impl RemoteError {
    // == Classify ==
    /// Maps the error onto the retry taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::RateLimited(_) => ErrorClass::RateLimited,
            RemoteError::QuotaExceeded(_) => ErrorClass::QuotaExceeded,
            RemoteError::Authentication(_) => ErrorClass::NonRetryable,
            RemoteError::Api { message, .. } if mentions_quota(message) => {
                ErrorClass::QuotaExceeded
            }
            RemoteError::Api { status: 429, .. } => ErrorClass::RateLimited,
            RemoteError::Api { status, .. } if *status >= 500 || *status == 408 => {
                ErrorClass::TransientService
            }
            RemoteError::Api { .. } => ErrorClass::NonRetryable,
            RemoteError::Network(_)
            | RemoteError::InvalidResponse(_)
            | RemoteError::Unexpected(_) => ErrorClass::TransientService,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}
