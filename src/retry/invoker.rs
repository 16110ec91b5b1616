//! Bounded, classified retry around a single logical remote call.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::RemoteError;
use crate::retry::{Backoff, ErrorClass};

// == Retry Policy ==
/// Attempt budget and delay schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Policy with `max_attempts` total attempts (at least one) and the
    /// default doubling backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

// == Retry Attempt ==
/// Record of one failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// 1-based
    pub attempt_number: u32,
    pub error_class: ErrorClass,
    pub error: RemoteError,
    /// Wait before the next attempt; None when this failure ended the call
    pub backoff_delay: Option<Duration>,
}

// == Invoke Failure ==
/// Terminal outcome of a call that did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeFailure {
    /// A failure retrying cannot fix; no further attempts were made
    NonRetryable { attempts: u32, error: RemoteError },
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last_error: RemoteError },
    /// The caller cancelled before the next attempt could start
    Cancelled {
        attempts: u32,
        last_error: Option<RemoteError>,
    },
}

impl InvokeFailure {
    /// Attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            InvokeFailure::NonRetryable { attempts, .. }
            | InvokeFailure::Exhausted { attempts, .. }
            | InvokeFailure::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// The error that ended the call, if any.
    pub fn last_error(&self) -> Option<&RemoteError> {
        match self {
            InvokeFailure::NonRetryable { error, .. } => Some(error),
            InvokeFailure::Exhausted { last_error, .. } => Some(last_error),
            InvokeFailure::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }
}

impl fmt::Display for InvokeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeFailure::NonRetryable { error, .. } => match error.class() {
                ErrorClass::QuotaExceeded => write!(
                    f,
                    "OpenAI API quota exceeded. Please check your billing and usage limits."
                ),
                _ => write!(f, "AI request failed (non-retryable): {}", error),
            },
            InvokeFailure::Exhausted {
                attempts,
                last_error,
            } => match last_error.class() {
                ErrorClass::RateLimited => write!(
                    f,
                    "Rate limit exceeded after {} attempts. Please try again later.",
                    attempts
                ),
                _ => write!(
                    f,
                    "Failed to generate AI summary after {} attempts: {}",
                    attempts, last_error
                ),
            },
            InvokeFailure::Cancelled { attempts, .. } => {
                write!(f, "AI summary cancelled after {} attempts", attempts)
            }
        }
    }
}

// == Invoke Outcome ==
/// Result of [`ResilientInvoker::invoke`] plus the attempt history.
#[derive(Debug, Clone)]
pub struct InvokeOutcome<T> {
    pub result: Result<T, InvokeFailure>,
    /// Attempts started, successful or not
    pub attempts: u32,
    /// Every failed attempt, in order
    pub history: Vec<RetryAttempt>,
}

fn finish<T>(
    result: Result<T, InvokeFailure>,
    attempts: u32,
    history: Vec<RetryAttempt>,
) -> InvokeOutcome<T> {
    InvokeOutcome {
        result,
        attempts,
        history,
    }
}

// == Resilient Invoker ==
/// Runs a remote call, retrying retryable failures with jittered backoff.
///
/// Attempts are strictly sequential. A non-retryable failure ends the call
/// immediately whatever budget remains; cancellation is honored between
/// attempts, never by interrupting one in flight.
#[derive(Debug, Clone, Default)]
pub struct ResilientInvoker {
    policy: RetryPolicy,
}

impl ResilientInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `call` until it succeeds or a terminal state is reached.
    ///
    /// `call` receives the 1-based attempt number.
    pub async fn invoke<T, F, Fut>(&self, call: F) -> InvokeOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.invoke_with_cancel(call, &CancellationToken::new())
            .await
    }

    /// Like [`invoke`](Self::invoke), but stops before starting a new attempt
    /// once `cancel` fires.
    pub async fn invoke_with_cancel<T, F, Fut>(
        &self,
        mut call: F,
        cancel: &CancellationToken,
    ) -> InvokeOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut history: Vec<RetryAttempt> = Vec::new();
        let mut attempt: u32 = 1;

        loop {
            if cancel.is_cancelled() {
                let last_error = history.last().map(|a| a.error.clone());
                warn!("Remote call cancelled before attempt {}", attempt);
                return finish(
                    Err(InvokeFailure::Cancelled {
                        attempts: attempt - 1,
                        last_error,
                    }),
                    attempt - 1,
                    history,
                );
            }

            debug!("Attempting remote call (attempt {}/{})", attempt, max_attempts);

            let error = match call(attempt).await {
                Ok(value) => return finish(Ok(value), attempt, history),
                Err(error) => error,
            };
            let class = error.class();

            if !class.is_retryable() {
                error!(
                    "Remote call failed with {} error on attempt {}: {}",
                    class, attempt, error
                );
                history.push(RetryAttempt {
                    attempt_number: attempt,
                    error_class: class,
                    error: error.clone(),
                    backoff_delay: None,
                });
                return finish(
                    Err(InvokeFailure::NonRetryable {
                        attempts: attempt,
                        error,
                    }),
                    attempt,
                    history,
                );
            }

            if attempt >= max_attempts {
                error!(
                    "Remote call failed after {} attempts ({}): {}",
                    attempt, class, error
                );
                history.push(RetryAttempt {
                    attempt_number: attempt,
                    error_class: class,
                    error: error.clone(),
                    backoff_delay: None,
                });
                return finish(
                    Err(InvokeFailure::Exhausted {
                        attempts: attempt,
                        last_error: error,
                    }),
                    attempt,
                    history,
                );
            }

            let delay = self.policy.backoff.delay_for(attempt);
            warn!(
                "Attempt {}/{} failed ({}): {}. Waiting {:.2} seconds before retry...",
                attempt,
                max_attempts,
                class,
                error,
                delay.as_secs_f64()
            );
            history.push(RetryAttempt {
                attempt_number: attempt,
                error_class: class,
                error,
                backoff_delay: Some(delay),
            });

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
