//! # Backoff policy for heartbeat retries and recovery probes.
//!
//! [`BackoffPolicy`] computes the delay before attempt `n` as
//! `first × factor^n`, clamped to `max`, then jittered. The base delay depends
//! only on the attempt number, so jitter never feeds back into later delays.
//!
//! Heartbeat retries additionally run under a time budget (the component's
//! loop period): [`BackoffPolicy::within_budget`] tells the caller whether the
//! next retry still fits.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use meshvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(2), Duration::from_millis(400));
//! assert_eq!(backoff.next(10), Duration::from_secs(1));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter applied to each computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Constant 100ms delay, capped at 30s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }

    /// Returns the delay for `attempt` if waiting it still leaves time before
    /// `remaining` runs out; `None` once the budget is spent.
    pub fn within_budget(&self, attempt: u32, remaining: Duration) -> Option<Duration> {
        let delay = self.next(attempt);
        (delay < remaining).then_some(delay)
    }
}
