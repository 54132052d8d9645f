//! The shared retry budget.
//!
//! Every transport carries at most one [`RetryThrottle`]; all RPCs on that
//! transport contend for it. Failures drain tokens, successes refill them
//! by the configured ratio, and retries (and additional hedges) are only
//! permitted while more than half the budget remains.

use std::sync::atomic::{AtomicI64, Ordering};

/// Token counts are scaled by 1000 internally so `token_ratio` keeps three
/// decimal places of precision.
const TOKEN_SCALE: i64 = 1000;

/// Global failure budget shared by all calls on one transport.
#[derive(Debug)]
pub struct RetryThrottle {
    scaled_tokens: AtomicI64,
    scaled_max: i64,
    scaled_ratio: i64,
}

impl RetryThrottle {
    /// Create a throttle with a full budget.
    ///
    /// # Panics
    ///
    /// Panics if `max_tokens` is zero or `token_ratio` is not positive.
    pub fn new(max_tokens: u32, token_ratio: f64) -> Self {
        assert!(max_tokens > 0, "max_tokens must be positive");
        assert!(token_ratio > 0.0, "token_ratio must be positive");
        let scaled_max = i64::from(max_tokens) * TOKEN_SCALE;
        Self {
            scaled_tokens: AtomicI64::new(scaled_max),
            scaled_max,
            scaled_ratio: (token_ratio * TOKEN_SCALE as f64).round() as i64,
        }
    }

    /// Whether a retry or an additional hedge may run right now.
    pub fn permits(&self) -> bool {
        self.scaled_tokens.load(Ordering::Acquire) > self.scaled_max / 2
    }

    /// Record a throttled call outcome that counts as a success.
    pub fn record_success(&self) {
        self.add(self.scaled_ratio);
    }

    /// Record a throttled call outcome that counts as a failure.
    pub fn record_failure(&self) {
        self.add(-TOKEN_SCALE);
    }

    /// The current token count, unscaled.
    pub fn tokens(&self) -> f64 {
        self.scaled_tokens.load(Ordering::Acquire) as f64 / TOKEN_SCALE as f64
    }

    fn add(&self, delta: i64) {
        let _ = self
            .scaled_tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| {
                Some((tokens + delta).clamp(0, self.scaled_max))
            });
    }
}
