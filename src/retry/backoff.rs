//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Upper bound on a single delay, reached only with very large attempt counts.
pub const MAX_DELAY: Duration = Duration::from_secs(600);

// == Backoff ==
/// Delay schedule between attempts.
///
/// After failed attempt `n` (1-based) the caller waits
/// `(base^(n-1) + jitter) * unit`, where jitter is uniform in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: f64,
    unit: Duration,
}

impl Backoff {
    /// Creates a schedule. `base` below 1.0 is raised to 1.0 so delays never shrink.
    pub fn new(base: f64, unit: Duration) -> Self {
        Self {
            base: if base.is_finite() { base.max(1.0) } else { 2.0 },
            unit,
        }
    }

    /// Delay after `attempt` failed, with fresh random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen();
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay after `attempt` failed, with the given jitter in `[0, 1)`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.base.powi(exponent) + jitter.clamp(0.0, 1.0);
        let secs = self.unit.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }
}

impl Default for Backoff {
    /// Doubling schedule in seconds: 1s, 2s, 4s, ... plus up to 1s jitter.
    fn default() -> Self {
        Self::new(2.0, Duration::from_secs(1))
    }
}
