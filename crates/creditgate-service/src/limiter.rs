//! Fixed-window rate limiter.
//!
//! Buckets are keyed by identifier, window length and window index
//! (`now / window`). A bucket is created on its first hit. Closed buckets are
//! swept lazily, at most once per window length, by whichever call is due;
//! no background task is involved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use creditgate_core::{Clock, MeterError, Result, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    identifier: String,
    window_ms: u64,
    index: u64,
}

#[derive(Default)]
struct LimiterState {
    buckets: HashMap<BucketKey, u32>,
    next_sweep_ms: u64,
}

impl LimiterState {
    /// Drop closed buckets if a sweep is due.
    fn sweep(&mut self, now: u64, window_ms: u64) {
        if now < self.next_sweep_ms {
            return;
        }
        self.buckets
            .retain(|key, _| key.index.saturating_add(1).saturating_mul(key.window_ms) > now);
        self.next_sweep_ms = now.saturating_add(window_ms);
    }
}

/// Counts calls per identifier per fixed window.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter reading wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Record a call and report whether it fits in the current window.
    #[must_use]
    pub fn allow(&self, identifier: &str, max: u32, window: Duration) -> bool {
        self.check(identifier, max, window).is_ok()
    }

    /// Record a call, failing with `RateLimited` once `max` calls were
    /// already made in the current window. Rejected calls are not counted.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::RateLimited` with the time left in the window.
    pub fn check(&self, identifier: &str, max: u32, window: Duration) -> Result<()> {
        let now = self.clock.now_millis();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let index = now / window_ms;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sweep(now, window_ms);

        let count = state
            .buckets
            .entry(BucketKey {
                identifier: identifier.to_string(),
                window_ms,
                index,
            })
            .or_insert(0);

        if *count >= max {
            let retry_after_ms = (index + 1).saturating_mul(window_ms) - now;
            tracing::debug!(
                identifier = %identifier,
                max = max,
                retry_after_ms = retry_after_ms,
                "Rate limit exceeded"
            );
            return Err(MeterError::RateLimited { retry_after_ms });
        }

        *count += 1;
        Ok(())
    }

    /// Number of live buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .buckets
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
