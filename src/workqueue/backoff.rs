//! Per-key exponential backoff for requeued work items.
//!
//! Each failed reconcile of a key waits longer before it is redelivered:
//! `initial_delay * multiplier^n` where `n` counts the key's previous
//! requeues, capped at `max_delay`. A successful reconcile forgets the key and
//! the next failure starts from `initial_delay` again.

use std::time::Duration;

/// Configuration for exponential requeue backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first requeue.
    pub initial_delay: Duration,

    /// Maximum delay between requeues (cap for exponential growth).
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (typically 2.0).
    pub multiplier: f64,
}

impl BackoffConfig {
    /// Default backoff for controller work queues.
    ///
    /// 5ms doubling up to a 1000s cap: quick recovery from conflicts and
    /// brief outages without hammering the store during long ones.
    pub const DEFAULT: Self = Self {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_secs(1000),
        multiplier: 2.0,
    };

    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// Computes the delay for the given requeue attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Zero times an overflowed (infinite) multiplier would be NaN.
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
