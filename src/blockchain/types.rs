// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! NEAR network constants and numeric wire helpers.

use crate::models::{Network, NetworkInfo};

/// Yocto-NEAR amount.
pub type Balance = u128;

/// Gas units.
pub type Gas = u64;

/// Built-in NEAR network configuration.
#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    /// Network identifier (`testnet`, `mainnet`)
    pub network_id: &'static str,
    /// JSON-RPC endpoint URL
    pub node_url: &'static str,
    /// Block explorer URL
    pub explorer_url: &'static str,
    /// Account indexer URL
    pub indexer_url: &'static str,
    /// Web wallet URL
    pub wallet_url: &'static str,
    /// Account helper URL
    pub helper_url: &'static str,
}

/// NEAR testnet configuration.
pub const NEAR_TESTNET: NetworkConfig = NetworkConfig {
    network_id: "testnet",
    node_url: "https://rpc.testnet.near.org",
    explorer_url: "https://explorer.testnet.near.org",
    indexer_url: "https://testnet-api.kitwallet.app",
    wallet_url: "https://wallet.testnet.near.org",
    helper_url: "https://helper.testnet.near.org",
};

/// NEAR mainnet configuration.
pub const NEAR_MAINNET: NetworkConfig = NetworkConfig {
    network_id: "mainnet",
    node_url: "https://rpc.mainnet.near.org",
    explorer_url: "https://explorer.near.org",
    indexer_url: "https://api.kitwallet.app",
    wallet_url: "https://wallet.near.org/",
    helper_url: "https://helper.mainnet.near.org",
};

/// Networks that come with every installation, in selection-index order.
pub const DEFAULT_NETWORKS: [NetworkConfig; 2] = [NEAR_TESTNET, NEAR_MAINNET];

/// Network ids a page may switch the wallet to.
pub const SUPPORTED_NETWORKS: [&str; 2] = ["testnet", "mainnet"];

/// Network id reported before the page learned the wallet's network.
pub const UNINITIALIZED_NETWORK_ID: &str = "uninitialized";

pub fn is_supported_network(network_id: &str) -> bool {
    SUPPORTED_NETWORKS.contains(&network_id)
}

impl From<&NetworkConfig> for Network {
    fn from(config: &NetworkConfig) -> Self {
        Network {
            network_id: config.network_id.to_string(),
            node_url: config.node_url.to_string(),
            explorer_url: config.explorer_url.to_string(),
            indexer_url: config.indexer_url.to_string(),
            wallet_url: config.wallet_url.to_string(),
            helper_url: config.helper_url.to_string(),
        }
    }
}

impl NetworkInfo {
    /// Placeholder network carried by the page API until the first fetch.
    pub fn uninitialized() -> Self {
        Self {
            network_id: UNINITIALIZED_NETWORK_ID.to_string(),
            node_url: String::new(),
        }
    }
}

// =============================================================================
// Decimal-string serde helpers
// =============================================================================

/// Serialize large integers as decimal strings, accept strings or numbers.
pub mod dec_format {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    pub trait DecType: Sized {
        fn format(&self) -> String;
        fn parse(raw: &str) -> Option<Self>;
        fn from_u64(n: u64) -> Self;
    }

    impl DecType for u128 {
        fn format(&self) -> String {
            self.to_string()
        }
        fn parse(raw: &str) -> Option<Self> {
            raw.trim().parse().ok()
        }
        fn from_u64(n: u64) -> Self {
            n as u128
        }
    }

    impl DecType for u64 {
        fn format(&self) -> String {
            self.to_string()
        }
        fn parse(raw: &str) -> Option<Self> {
            raw.trim().parse().ok()
        }
        fn from_u64(n: u64) -> Self {
            n
        }
    }

    pub fn serialize<T: DecType, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format())
    }

    pub fn deserialize<'de, T: DecType, D: Deserializer<'de>>(deserializer: D) -> Result<T, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => T::parse(&s).ok_or_else(|| de::Error::custom(format!("invalid integer {s:?}"))),
            Raw::Num(n) => Ok(T::from_u64(n)),
        }
    }

    /// Optional variant; `null` and a missing field both mean `None`.
    pub mod option {
        use super::DecType;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<T: DecType, S: Serializer>(
            value: &Option<T>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&v.format()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, T: DecType, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<T>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapper<T: DecType>(#[serde(with = "super")] T);

            Ok(Option::<Wrapper<T>>::deserialize(deserializer)?.map(|Wrapper(v)| v))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Amounts {
        #[serde(with = "dec_format")]
        deposit: Balance,
        #[serde(with = "dec_format")]
        gas: Gas,
        #[serde(default, with = "dec_format::option")]
        allowance: Option<Balance>,
    }

    #[test]
    fn supported_networks_are_the_builtins() {
        assert!(is_supported_network("testnet"));
        assert!(is_supported_network("mainnet"));
        assert!(!is_supported_network("betanet"));
        assert!(!is_supported_network(UNINITIALIZED_NETWORK_ID));
        assert_eq!(DEFAULT_NETWORKS[0].network_id, "testnet");
    }

    #[test]
    fn balances_serialize_as_strings_and_accept_numbers() {
        let parsed: Amounts =
            serde_json::from_str(r#"{"deposit":"1000000000000000000000000","gas":30000000000000}"#)
                .unwrap();
        assert_eq!(parsed.deposit, 10u128.pow(24));
        assert_eq!(parsed.gas, 30_000_000_000_000);
        assert_eq!(parsed.allowance, None);

        let json = serde_json::to_value(&parsed).unwrap();
        assert_eq!(json["deposit"], "1000000000000000000000000");
        assert_eq!(json["gas"], "30000000000000");
        assert!(json["allowance"].is_null());
    }

    #[test]
    fn invalid_amounts_are_rejected() {
        let err = serde_json::from_str::<Amounts>(r#"{"deposit":"-1","gas":"1"}"#);
        assert!(err.is_err());
    }
}
