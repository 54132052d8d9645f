//! Client-side service configuration.
//!
//! A service config is loaded once per client from its JSON form. It maps
//! methods to per-method policy (timeouts, message-size caps, retry or
//! hedging), names the load-balancing hints the transport should honor, and
//! optionally enables channel-wide retry throttling.

mod load_balancing;
mod policy;

use std::collections::HashMap;

use plexrpc_core::MethodDescriptor;
use serde::Deserialize;
use std::time::Duration;

pub use load_balancing::{LoadBalancingConfig, PickFirstConfig, RoundRobinConfig};
pub use policy::{HedgingPolicy, RetryPolicy, RetryThrottling, MAX_ATTEMPT_LIMIT};

/// Service-config loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed service config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid service config: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }
}

/// One `name` entry of a method config.
///
/// An empty method matches every method of the service; an empty service is
/// only legal with an empty method and makes the entry the channel default.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MethodName {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub method: String,
}

/// Per-method policy.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MethodConfig {
    pub name: Vec<MethodName>,
    #[serde(default, deserialize_with = "opt_duration")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub wait_for_ready: Option<bool>,
    #[serde(default)]
    pub max_request_message_bytes: Option<usize>,
    #[serde(default)]
    pub max_response_message_bytes: Option<usize>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub hedging_policy: Option<HedgingPolicy>,
}

fn opt_duration<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    let text = Option::<String>::deserialize(deserializer)?;
    text.map(|t| policy::parse_duration_secs(&t).map_err(serde::de::Error::custom))
        .transpose()
}

impl MethodConfig {
    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("methodConfig entry with no names"));
        }
        for name in &self.name {
            if name.service.is_empty() && !name.method.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "method name {:?} has a method but no service",
                    name.method
                )));
            }
        }
        if self.retry_policy.is_some() && self.hedging_policy.is_some() {
            return Err(ConfigError::invalid(
                "retryPolicy and hedgingPolicy are mutually exclusive",
            ));
        }
        if let Some(retry) = &mut self.retry_policy {
            retry.validate()?;
        }
        if let Some(hedging) = &mut self.hedging_policy {
            hedging.validate()?;
        }
        Ok(())
    }
}

/// Client-side per-service policy, loaded once per client.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(default)]
    pub method_config: Vec<MethodConfig>,
    #[serde(default)]
    pub load_balancing_config: Vec<LoadBalancingConfig>,
    #[serde(default)]
    pub retry_throttling: Option<RetryThrottling>,

    /// Exact and wildcard lookup index over `method_config`.
    #[serde(skip)]
    index: HashMap<(String, String), usize>,
}

impl ServiceConfig {
    /// Parse and validate the JSON form.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut config: ServiceConfig = serde_json::from_str(json)?;
        config.finish()?;
        Ok(config)
    }

    /// An empty config with no per-method policy.
    pub fn empty() -> Self {
        Self::default()
    }

    fn finish(&mut self) -> Result<(), ConfigError> {
        if let Some(throttling) = &self.retry_throttling {
            throttling.validate()?;
        }
        for entry in &mut self.method_config {
            entry.validate()?;
        }
        self.index.clear();
        for (position, entry) in self.method_config.iter().enumerate() {
            for name in &entry.name {
                let key = (name.service.clone(), name.method.clone());
                if self.index.contains_key(&key) {
                    return Err(ConfigError::invalid(format!(
                        "duplicate method config for {}/{}",
                        name.service, name.method
                    )));
                }
                self.index.insert(key, position);
            }
        }
        Ok(())
    }

    /// Look up the config governing `descriptor`: an exact match first, the
    /// service-wide wildcard second, and the channel default last.
    pub fn method_config(&self, descriptor: &MethodDescriptor) -> Option<&MethodConfig> {
        let exact = (
            descriptor.service().to_owned(),
            descriptor.method().to_owned(),
        );
        if let Some(&position) = self.index.get(&exact) {
            return Some(&self.method_config[position]);
        }
        let wildcard = (descriptor.service().to_owned(), String::new());
        if let Some(&position) = self.index.get(&wildcard) {
            return Some(&self.method_config[position]);
        }
        let default = (String::new(), String::new());
        self.index
            .get(&default)
            .map(|&position| &self.method_config[position])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexrpc_core::Code;

    const FULL_CONFIG: &str = r#"{
        "methodConfig": [
            {
                "name": [{"service": "echo.Echo", "method": "Get"}],
                "timeout": "10s",
                "waitForReady": true,
                "maxRequestMessageBytes": 4096,
                "maxResponseMessageBytes": 8192,
                "retryPolicy": {
                    "maxAttempts": 3,
                    "initialBackoff": "0.01s",
                    "maxBackoff": "0.1s",
                    "backoffMultiplier": 2.0,
                    "retryableStatusCodes": ["UNAVAILABLE"]
                }
            },
            {
                "name": [{"service": "echo.Echo"}],
                "timeout": "5s"
            },
            {
                "name": [{}],
                "timeout": "30s"
            },
            {
                "name": [{"service": "race.Race", "method": "Run"}],
                "hedgingPolicy": {
                    "maxAttempts": 3,
                    "hedgingDelay": "0.05s",
                    "nonFatalStatusCodes": ["UNAVAILABLE"]
                }
            }
        ],
        "loadBalancingConfig": [{"pick_first": {"shuffleAddressList": true}}],
        "retryThrottling": {"maxTokens": 10, "tokenRatio": 0.5}
    }"#;

    #[test]
    fn test_full_config_round_trip() {
        let config = ServiceConfig::from_json(FULL_CONFIG).unwrap();

        let exact = config
            .method_config(&MethodDescriptor::new("echo.Echo", "Get"))
            .unwrap();
        assert_eq!(exact.timeout, Some(Duration::from_secs(10)));
        assert_eq!(exact.wait_for_ready, Some(true));
        assert_eq!(exact.max_request_message_bytes, Some(4096));
        let retry = exact.retry_policy.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 3);
        assert!(retry.is_retryable(Code::Unavailable));

        let hedged = config
            .method_config(&MethodDescriptor::new("race.Race", "Run"))
            .unwrap();
        assert!(hedged.hedging_policy.is_some());

        assert_eq!(
            config.retry_throttling,
            Some(RetryThrottling {
                max_tokens: 10,
                token_ratio: 0.5
            })
        );
        assert_eq!(config.load_balancing_config.len(), 1);
    }

    #[test]
    fn test_lookup_falls_back_to_wildcard_then_default() {
        let config = ServiceConfig::from_json(FULL_CONFIG).unwrap();

        // Unlisted method of a listed service: the service-wide entry.
        let wildcard = config
            .method_config(&MethodDescriptor::new("echo.Echo", "Other"))
            .unwrap();
        assert_eq!(wildcard.timeout, Some(Duration::from_secs(5)));

        // Unlisted service: the channel default.
        let default = config
            .method_config(&MethodDescriptor::new("other.Service", "Any"))
            .unwrap();
        assert_eq!(default.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_missing_method_config_is_none() {
        let config = ServiceConfig::from_json(r#"{}"#).unwrap();
        assert!(config
            .method_config(&MethodDescriptor::new("a.B", "C"))
            .is_none());
    }

    #[test]
    fn test_retry_and_hedging_are_exclusive() {
        let json = r#"{
            "methodConfig": [{
                "name": [{"service": "s.S", "method": "M"}],
                "retryPolicy": {
                    "maxAttempts": 2, "initialBackoff": "1s", "maxBackoff": "1s",
                    "backoffMultiplier": 1.0, "retryableStatusCodes": ["UNAVAILABLE"]
                },
                "hedgingPolicy": {"maxAttempts": 2}
            }]
        }"#;
        assert!(matches!(
            ServiceConfig::from_json(json),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_method_without_service_is_rejected() {
        let json = r#"{
            "methodConfig": [{"name": [{"method": "M"}], "timeout": "1s"}]
        }"#;
        assert!(ServiceConfig::from_json(json).is_err());
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let json = r#"{
            "methodConfig": [
                {"name": [{"service": "s.S", "method": "M"}], "timeout": "1s"},
                {"name": [{"service": "s.S", "method": "M"}], "timeout": "2s"}
            ]
        }"#;
        assert!(ServiceConfig::from_json(json).is_err());
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(matches!(
            ServiceConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_max_attempts_clamped_on_load() {
        let json = r#"{
            "methodConfig": [{
                "name": [{"service": "s.S", "method": "M"}],
                "retryPolicy": {
                    "maxAttempts": 7, "initialBackoff": "1s", "maxBackoff": "1s",
                    "backoffMultiplier": 1.0, "retryableStatusCodes": ["UNAVAILABLE"]
                }
            }]
        }"#;
        let config = ServiceConfig::from_json(json).unwrap();
        let method = config
            .method_config(&MethodDescriptor::new("s.S", "M"))
            .unwrap();
        assert_eq!(method.retry_policy.as_ref().unwrap().max_attempts, 5);
    }
}
