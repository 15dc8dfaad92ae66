//! Retry policy values.
//!
//! Retry loops take a `RetryPolicy` instead of hard-coding their schedule so
//! tests can inject a deterministic jitter function.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maps a capped exponential delay to the delay actually slept.
pub type JitterFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Bounded exponential backoff with jitter.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Attempts allowed after the first failure. `0` disables retries.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    jitter: JitterFn,
}

impl RetryPolicy {
    /// Create a policy using full jitter.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: Arc::new(full_jitter),
        }
    }

    /// Replace the jitter function.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterFn) -> Self {
        self.jitter = jitter;
        self
    }

    /// Disable jitter so delays are exactly exponential.
    #[must_use]
    pub fn without_jitter(self) -> Self {
        self.with_jitter(Arc::new(|delay| delay))
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Whether retry number `attempt` (1-based) is allowed.
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        (self.jitter)(base.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(250), Duration::from_secs(30))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

/// Uniformly random delay in `[delay / 2, delay]`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn full_jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as f64;
    let factor = 0.5 + rand::random::<f64>() * 0.5;
    Duration::from_millis((millis * factor) as u64)
}
