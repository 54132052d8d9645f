//! Exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;

/// Delay sequence between retry attempts.
///
/// The delay before attempt `n` (1-indexed) is sampled uniformly from
/// `[0, min(initial * multiplier^(n-1), max)]`. Server pushback overrides a
/// sampled delay and [`reset`](Backoff::reset)s the sequence, so the next
/// computed delay starts over at `n = 1`.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    exponent: i32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        debug_assert!(initial > Duration::ZERO, "initial backoff must be positive");
        debug_assert!(max > Duration::ZERO, "max backoff must be positive");
        debug_assert!(multiplier > 0.0, "backoff multiplier must be positive");
        Self {
            initial,
            max,
            multiplier,
            exponent: 0,
        }
    }

    /// The ceiling the next delay is sampled under, without advancing.
    pub fn next_ceiling(&self) -> Duration {
        let ceiling = self.initial.as_secs_f64() * self.multiplier.powi(self.exponent);
        Duration::from_secs_f64(ceiling.min(self.max.as_secs_f64()))
    }

    /// Sample the next delay and advance the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.next_ceiling();
        self.exponent += 1;
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::rng().random_range(0.0..=ceiling.as_secs_f64()))
    }

    /// Restart the sequence at the first delay.
    pub fn reset(&mut self) {
        self.exponent = 0;
    }
}
