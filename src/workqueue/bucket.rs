//! Overall token bucket for requeued work items.
//!
//! Per-key backoff keeps one failing key from spinning, but when many keys
//! fail at once each of them would still come back after a few milliseconds.
//! The bucket caps requeues across all keys: it holds up to `burst` tokens,
//! refills at `qps` tokens per second, and every requeue reserves one. A
//! reservation against an empty bucket is granted in the future, so the
//! delay it returns grows with the backlog.
//!
//! The queue waits for the longer of the per-key backoff and the bucket
//! delay.

use std::time::{Duration, Instant};

/// Requeue rate shared by all keys of a queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    /// Sustained requeues per second.
    pub qps: f64,

    /// Requeues allowed back to back before the rate applies.
    pub burst: u32,
}

impl BucketConfig {
    /// 10 requeues per second with bursts of up to 100.
    pub const DEFAULT: Self = Self { qps: 10.0, burst: 100 };

    pub fn new(qps: f64, burst: u32) -> Self {
        Self { qps, burst }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Reservation-based token bucket.
///
/// Starts full. The token count goes negative while reservations are
/// outstanding.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    config: BucketConfig,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub(crate) fn new(config: BucketConfig) -> Self {
        TokenBucket {
            config,
            tokens: f64::from(config.burst),
            last: Instant::now(),
        }
    }

    pub(crate) fn config(&self) -> BucketConfig {
        self.config
    }

    /// Takes one token at `now` and returns how long the caller must wait
    /// before using it.
    pub(crate) fn reserve(&mut self, now: Instant) -> Duration {
        // A non-positive or non-finite rate means no overall limit.
        if !(self.config.qps.is_finite() && self.config.qps > 0.0) {
            return Duration::ZERO;
        }
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = self.last.max(now);
        self.tokens = (self.tokens + elapsed * self.config.qps).min(f64::from(self.config.burst));
        self.tokens -= 1.0;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.config.qps)
        }
    }
}
