// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Data records shared between contexts and persisted in the stores.

use serde::{Deserialize, Serialize};

use crate::blockchain::types::{dec_format, Balance};

/// Fungible token tracked for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Account as persisted in the durable store. The private key is only ever
/// stored encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub encrypted_private_key: Option<String>,
    #[serde(default)]
    pub is_ledger: bool,
    #[serde(default)]
    pub tokens: Vec<Token>,
}

/// Account with its private key decrypted under the session password.
///
/// Only ever handed to the content script that signs on the user's behalf.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountWithPrivateKey {
    pub account_id: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub is_ledger: bool,
    #[serde(default)]
    pub tokens: Vec<Token>,
}

impl std::fmt::Debug for AccountWithPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountWithPrivateKey")
            .field("account_id", &self.account_id)
            .field("public_key", &self.public_key)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("is_ledger", &self.is_ledger)
            .finish()
    }
}

/// Network entry: built-in or user-added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub network_id: String,
    pub node_url: String,
    #[serde(default)]
    pub explorer_url: String,
    #[serde(default)]
    pub indexer_url: String,
    #[serde(default)]
    pub wallet_url: String,
    #[serde(default)]
    pub helper_url: String,
}

/// The part of a network a page gets to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub network_id: String,
    pub node_url: String,
}

impl From<&Network> for NetworkInfo {
    fn from(network: &Network) -> Self {
        Self {
            network_id: network.network_id.clone(),
            node_url: network.node_url.clone(),
        }
    }
}

/// Account as exposed to a connected website.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAccount {
    pub account_id: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
}

/// Function-call access key a website asks to be added on sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInPermission {
    pub receiver_id: String,
    #[serde(default)]
    pub method_names: Vec<String>,
    #[serde(default, with = "dec_format::option")]
    pub allowance: Option<Balance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInParams {
    pub permission: SignInPermission,
    pub accounts: Vec<ConnectedAccount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOutParams {
    pub accounts: Vec<ConnectedAccount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_account_records_decode_with_defaults() {
        let account: Account =
            serde_json::from_str(r#"{"accountId":"alice.testnet"}"#).unwrap();
        assert_eq!(account.public_key, None);
        assert!(!account.is_ledger);
        assert!(account.tokens.is_empty());
    }

    #[test]
    fn private_keys_are_redacted_in_debug_output() {
        let account = AccountWithPrivateKey {
            account_id: "alice.testnet".into(),
            public_key: None,
            private_key: Some("ed25519:secret".into()),
            is_ledger: false,
            tokens: vec![],
        };
        let printed = format!("{account:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn sign_in_allowance_is_optional() {
        let params: SignInParams = serde_json::from_str(
            r#"{"permission":{"receiverId":"dao.testnet","methodNames":["vote"]},"accounts":[]}"#,
        )
        .unwrap();
        assert_eq!(params.permission.allowance, None);

        let params: SignInParams = serde_json::from_str(
            r#"{"permission":{"receiverId":"dao.testnet","allowance":"250000000000000000000000"},"accounts":[]}"#,
        )
        .unwrap();
        assert_eq!(params.permission.allowance, Some(250_000_000_000_000_000_000_000));
    }
}
