//! Per-call options and execution-policy resolution.

use std::time::Duration;

use crate::config::{HedgingPolicy, MethodConfig, RetryPolicy};

/// How the executor drives attempts for a call.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ExecutionPolicy {
    /// One attempt, no retries.
    #[default]
    OneShot,
    /// Sequential attempts with exponential backoff.
    Retry(RetryPolicy),
    /// Staggered concurrent attempts.
    Hedging(HedgingPolicy),
}

/// Options the caller sets per call. Anything left unset falls back to the
/// method config, then to defaults.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub execution_policy: Option<ExecutionPolicy>,
    pub max_request_message_bytes: Option<usize>,
    pub max_response_message_bytes: Option<usize>,
    pub wait_for_ready: Option<bool>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn execution_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.execution_policy = Some(policy);
        self
    }

    pub fn max_request_message_bytes(mut self, limit: usize) -> Self {
        self.max_request_message_bytes = Some(limit);
        self
    }

    pub fn max_response_message_bytes(mut self, limit: usize) -> Self {
        self.max_response_message_bytes = Some(limit);
        self
    }

    pub fn wait_for_ready(mut self, wait: bool) -> Self {
        self.wait_for_ready = Some(wait);
        self
    }
}

/// The per-call settings after merging options and method config.
#[derive(Clone, Debug, Default)]
pub(crate) struct ResolvedCall {
    pub timeout: Option<Duration>,
    pub policy: ExecutionPolicy,
    pub max_request_message_bytes: Option<usize>,
    pub max_response_message_bytes: Option<usize>,
    pub wait_for_ready: bool,
}

/// Merge caller options with the method config.
///
/// Caller options win where both are set, except the timeout, which is the
/// minimum of the two so neither side's deadline is exceeded.
pub(crate) fn resolve(options: &CallOptions, config: Option<&MethodConfig>) -> ResolvedCall {
    let timeout = match (options.timeout, config.and_then(|c| c.timeout)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    let policy = options
        .execution_policy
        .clone()
        .or_else(|| {
            config.and_then(|c| {
                c.retry_policy
                    .clone()
                    .map(ExecutionPolicy::Retry)
                    .or_else(|| c.hedging_policy.clone().map(ExecutionPolicy::Hedging))
            })
        })
        .unwrap_or_default();
    ResolvedCall {
        timeout,
        policy,
        max_request_message_bytes: options
            .max_request_message_bytes
            .or(config.and_then(|c| c.max_request_message_bytes)),
        max_response_message_bytes: options
            .max_response_message_bytes
            .or(config.and_then(|c| c.max_response_message_bytes)),
        wait_for_ready: options
            .wait_for_ready
            .or(config.and_then(|c| c.wait_for_ready))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MethodName;

    fn config_with_timeout(timeout: Duration) -> MethodConfig {
        MethodConfig {
            name: vec![MethodName::default()],
            timeout: Some(timeout),
            wait_for_ready: Some(true),
            max_request_message_bytes: Some(1024),
            max_response_message_bytes: None,
            retry_policy: None,
            hedging_policy: None,
        }
    }

    #[test]
    fn test_timeout_takes_minimum() {
        let options = CallOptions::new().timeout(Duration::from_secs(3));
        let config = config_with_timeout(Duration::from_secs(10));
        let resolved = resolve(&options, Some(&config));
        assert_eq!(resolved.timeout, Some(Duration::from_secs(3)));

        let options = CallOptions::new().timeout(Duration::from_secs(30));
        let resolved = resolve(&options, Some(&config));
        assert_eq!(resolved.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_config_fills_unset_fields() {
        let resolved = resolve(
            &CallOptions::new(),
            Some(&config_with_timeout(Duration::from_secs(5))),
        );
        assert_eq!(resolved.timeout, Some(Duration::from_secs(5)));
        assert_eq!(resolved.max_request_message_bytes, Some(1024));
        assert!(resolved.wait_for_ready);
    }

    #[test]
    fn test_options_override_config() {
        let options = CallOptions::new()
            .max_request_message_bytes(64)
            .wait_for_ready(false);
        let resolved = resolve(&options, Some(&config_with_timeout(Duration::from_secs(5))));
        assert_eq!(resolved.max_request_message_bytes, Some(64));
        assert!(!resolved.wait_for_ready);
    }

    #[test]
    fn test_defaults_without_config() {
        let resolved = resolve(&CallOptions::new(), None);
        assert_eq!(resolved.timeout, None);
        assert_eq!(resolved.policy, ExecutionPolicy::OneShot);
        assert!(!resolved.wait_for_ready);
    }
}
