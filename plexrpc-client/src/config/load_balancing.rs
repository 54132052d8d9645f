//! Load-balancing configuration hints.
//!
//! The runtime does not balance load itself; picking and rotating addresses
//! belongs to the transport. The service config still names a policy, and
//! the transport reads these hints off the parsed config.

use rand::seq::SliceRandom;
use serde::Deserialize;

/// One entry of `loadBalancingConfig`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingConfig {
    PickFirst(PickFirstConfig),
    RoundRobin(RoundRobinConfig),
}

/// `pick_first`: try addresses in order, optionally shuffled once.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PickFirstConfig {
    #[serde(default)]
    pub shuffle_address_list: bool,
}

impl PickFirstConfig {
    /// Shuffle an address list if the config asks for it.
    pub fn apply<T>(&self, addresses: &mut [T]) {
        if self.shuffle_address_list {
            addresses.shuffle(&mut rand::rng());
        }
    }
}

/// `round_robin`: rotate across all addresses.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RoundRobinConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_pick_first() {
        let configs: Vec<LoadBalancingConfig> =
            serde_json::from_str(r#"[{"pick_first": {"shuffleAddressList": true}}]"#).unwrap();
        assert_eq!(
            configs,
            vec![LoadBalancingConfig::PickFirst(PickFirstConfig {
                shuffle_address_list: true
            })]
        );
    }

    #[test]
    fn test_deserialize_round_robin() {
        let configs: Vec<LoadBalancingConfig> =
            serde_json::from_str(r#"[{"round_robin": {}}]"#).unwrap();
        assert_eq!(
            configs,
            vec![LoadBalancingConfig::RoundRobin(RoundRobinConfig {})]
        );
    }

    #[test]
    fn test_shuffle_disabled_preserves_order() {
        let config = PickFirstConfig {
            shuffle_address_list: false,
        };
        let mut addresses = vec!["a", "b", "c"];
        config.apply(&mut addresses);
        assert_eq!(addresses, ["a", "b", "c"]);
    }

    #[test]
    fn test_shuffle_keeps_all_addresses() {
        let config = PickFirstConfig {
            shuffle_address_list: true,
        };
        let mut addresses: Vec<u32> = (0..32).collect();
        config.apply(&mut addresses);
        addresses.sort_unstable();
        assert_eq!(addresses, (0..32).collect::<Vec<_>>());
    }
}
