//! Retry, hedging, and throttling policy models.
//!
//! These deserialize straight out of the service-config JSON. Durations are
//! decimal-second strings (`"0.1s"`), status codes are wire integers or
//! canonical names.

use std::time::Duration;

use plexrpc_core::Code;
use serde::{Deserialize, Deserializer};

use crate::config::ConfigError;
use crate::throttle::RetryThrottle;

/// Attempt counts above this are clamped at validation time.
pub const MAX_ATTEMPT_LIMIT: u32 = 5;

/// Per-method retry tuning.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(deserialize_with = "duration_secs")]
    pub initial_backoff: Duration,
    #[serde(deserialize_with = "duration_secs")]
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub retryable_status_codes: Vec<Code>,
}

impl RetryPolicy {
    /// Validate and normalize. Attempt counts above the limit are clamped;
    /// everything else invalid is rejected.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.max_attempts <= 1 {
            return Err(ConfigError::invalid("retryPolicy.maxAttempts must be > 1"));
        }
        if self.max_attempts > MAX_ATTEMPT_LIMIT {
            tracing::warn!(
                max_attempts = self.max_attempts,
                "clamping retryPolicy.maxAttempts to {MAX_ATTEMPT_LIMIT}"
            );
            self.max_attempts = MAX_ATTEMPT_LIMIT;
        }
        if self.initial_backoff.is_zero() {
            return Err(ConfigError::invalid(
                "retryPolicy.initialBackoff must be positive",
            ));
        }
        if self.max_backoff.is_zero() {
            return Err(ConfigError::invalid(
                "retryPolicy.maxBackoff must be positive",
            ));
        }
        if self.backoff_multiplier <= 0.0 {
            return Err(ConfigError::invalid(
                "retryPolicy.backoffMultiplier must be positive",
            ));
        }
        if self.retryable_status_codes.is_empty() {
            return Err(ConfigError::invalid(
                "retryPolicy.retryableStatusCodes must not be empty",
            ));
        }
        Ok(())
    }

    pub fn is_retryable(&self, code: Code) -> bool {
        self.retryable_status_codes.contains(&code)
    }
}

/// Per-method hedging tuning.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HedgingPolicy {
    pub max_attempts: u32,
    #[serde(default, deserialize_with = "opt_duration_secs")]
    pub hedging_delay: Option<Duration>,
    #[serde(default)]
    pub non_fatal_status_codes: Vec<Code>,
}

impl HedgingPolicy {
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.max_attempts <= 1 {
            return Err(ConfigError::invalid("hedgingPolicy.maxAttempts must be > 1"));
        }
        if self.max_attempts > MAX_ATTEMPT_LIMIT {
            tracing::warn!(
                max_attempts = self.max_attempts,
                "clamping hedgingPolicy.maxAttempts to {MAX_ATTEMPT_LIMIT}"
            );
            self.max_attempts = MAX_ATTEMPT_LIMIT;
        }
        Ok(())
    }

    /// The stagger between hedge launches; zero launches them immediately.
    pub fn delay(&self) -> Duration {
        self.hedging_delay.unwrap_or(Duration::ZERO)
    }

    pub fn is_non_fatal(&self, code: Code) -> bool {
        self.non_fatal_status_codes.contains(&code)
    }
}

/// Channel-wide retry throttling.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryThrottling {
    pub max_tokens: u32,
    pub token_ratio: f64,
}

impl RetryThrottling {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid(
                "retryThrottling.maxTokens must be positive",
            ));
        }
        if self.token_ratio <= 0.0 {
            return Err(ConfigError::invalid(
                "retryThrottling.tokenRatio must be positive",
            ));
        }
        Ok(())
    }

    /// Build the shared throttle this config describes.
    pub fn build(&self) -> RetryThrottle {
        RetryThrottle::new(self.max_tokens, self.token_ratio)
    }
}

/// Parse a `"<decimal>s"` duration string.
pub(crate) fn parse_duration_secs(text: &str) -> Result<Duration, String> {
    let digits = text
        .strip_suffix('s')
        .ok_or_else(|| format!("duration {text:?} is missing the 's' suffix"))?;
    let secs: f64 = digits
        .parse()
        .map_err(|_| format!("duration {text:?} is not a number of seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("duration {text:?} is out of range"));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| format!("duration {text:?} is out of range"))
}

fn duration_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse_duration_secs(&text).map_err(serde::de::Error::custom)
}

fn opt_duration_secs<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    let text = Option::<String>::deserialize(deserializer)?;
    text.map(|t| parse_duration_secs(&t).map_err(serde::de::Error::custom))
        .transpose()
}
