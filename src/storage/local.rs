// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable area: accounts, networks and per-website grants.
//!
//! The accounts list is append-only. An entry is only ever changed to fill
//! in a missing public key or to add a token. Website grants are keyed by
//! the lower-cased origin.

use std::collections::HashMap;
use std::sync::Arc;

use super::{KeyValueStore, StorageResult};
use crate::blockchain::types::DEFAULT_NETWORKS;
use crate::models::{Account, Network, Token};

pub const HASHED_PASSWORD_KEY: &str = "hashedPassword";
pub const ACCOUNTS_KEY: &str = "accounts";
pub const LAST_SELECTED_ACCOUNT_INDEX_KEY: &str = "lastSelectedAccountIndex";
pub const WEBSITES_DATA_KEY: &str = "websitesData";
pub const CUSTOM_NETWORKS_KEY: &str = "customNetworks";
pub const LAST_SELECTED_NETWORK_INDEX_KEY: &str = "lastSelectedNetworkIndex";

/// Granted account ids per lowercased origin.
type WebsitesData = HashMap<String, Vec<String>>;

#[derive(Clone)]
pub struct LocalStore {
    store: Arc<dyn KeyValueStore>,
}

impl LocalStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn raw(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    // =========================================================================
    // Password
    // =========================================================================

    pub fn hashed_password(&self) -> StorageResult<Option<String>> {
        self.store.get_json(HASHED_PASSWORD_KEY)
    }

    pub fn set_hashed_password(&self, hashed: &str) -> StorageResult<()> {
        self.store.set_json(HASHED_PASSWORD_KEY, &hashed)
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    pub fn accounts(&self) -> StorageResult<Vec<Account>> {
        Ok(self.store.get_json(ACCOUNTS_KEY)?.unwrap_or_default())
    }

    /// Append an account and select it. Re-adding a known account id only
    /// selects the existing entry.
    pub fn add_account(&self, account: Account) -> StorageResult<usize> {
        let mut index = 0;
        self.store.update_json::<Vec<Account>, _>(ACCOUNTS_KEY, |accounts| {
            let mut accounts = accounts.unwrap_or_default();
            match accounts.iter().position(|a| a.account_id == account.account_id) {
                Some(existing) => index = existing,
                None => {
                    index = accounts.len();
                    accounts.push(account);
                }
            }
            accounts
        })?;
        self.select_account(index)?;
        Ok(index)
    }

    /// Fill in a public key for an account that has none. Returns whether
    /// anything changed.
    pub fn set_account_public_key(&self, account_id: &str, public_key: &str) -> StorageResult<bool> {
        let mut changed = false;
        self.store.update_json::<Vec<Account>, _>(ACCOUNTS_KEY, |accounts| {
            let mut accounts = accounts.unwrap_or_default();
            if let Some(account) = accounts
                .iter_mut()
                .find(|a| a.account_id == account_id && a.public_key.is_none())
            {
                account.public_key = Some(public_key.to_string());
                changed = true;
            }
            accounts
        })?;
        Ok(changed)
    }

    /// Track a token on an account unless it is already tracked.
    pub fn add_token(&self, account_id: &str, token: Token) -> StorageResult<bool> {
        let mut changed = false;
        self.store.update_json::<Vec<Account>, _>(ACCOUNTS_KEY, |accounts| {
            let mut accounts = accounts.unwrap_or_default();
            if let Some(account) = accounts.iter_mut().find(|a| a.account_id == account_id) {
                if !account.tokens.iter().any(|t| t.address == token.address) {
                    account.tokens.push(token);
                    changed = true;
                }
            }
            accounts
        })?;
        Ok(changed)
    }

    pub fn last_selected_account_index(&self) -> StorageResult<Option<usize>> {
        self.store.get_json(LAST_SELECTED_ACCOUNT_INDEX_KEY)
    }

    pub fn select_account(&self, index: usize) -> StorageResult<()> {
        self.store.set_json(LAST_SELECTED_ACCOUNT_INDEX_KEY, &index)
    }

    pub fn current_account(&self) -> StorageResult<Option<Account>> {
        let accounts = self.accounts()?;
        let index = self.last_selected_account_index()?.unwrap_or(0);
        Ok(accounts.into_iter().nth(index))
    }

    // =========================================================================
    // Networks
    // =========================================================================

    pub fn custom_networks(&self) -> StorageResult<Vec<Network>> {
        Ok(self.store.get_json(CUSTOM_NETWORKS_KEY)?.unwrap_or_default())
    }

    /// Add a user network. Ids already in the list are ignored.
    pub fn add_custom_network(&self, network: Network) -> StorageResult<bool> {
        if self.networks()?.iter().any(|n| n.network_id == network.network_id) {
            return Ok(false);
        }
        let mut added = false;
        self.store.update_json::<Vec<Network>, _>(CUSTOM_NETWORKS_KEY, |networks| {
            let mut networks = networks.unwrap_or_default();
            if !networks.iter().any(|n| n.network_id == network.network_id) {
                networks.push(network);
                added = true;
            }
            networks
        })?;
        Ok(added)
    }

    /// Built-in networks followed by custom ones.
    pub fn networks(&self) -> StorageResult<Vec<Network>> {
        let mut networks: Vec<Network> = DEFAULT_NETWORKS.iter().map(Network::from).collect();
        networks.extend(self.custom_networks()?);
        Ok(networks)
    }

    pub fn last_selected_network_index(&self) -> StorageResult<usize> {
        Ok(self.store.get_json(LAST_SELECTED_NETWORK_INDEX_KEY)?.unwrap_or(0))
    }

    pub fn select_network(&self, index: usize) -> StorageResult<()> {
        self.store.set_json(LAST_SELECTED_NETWORK_INDEX_KEY, &index)
    }

    /// Select a network by id. Returns `false` if no such network exists.
    pub fn select_network_by_id(&self, network_id: &str) -> StorageResult<bool> {
        match self.networks()?.iter().position(|n| n.network_id == network_id) {
            Some(index) => {
                self.select_network(index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Currently selected network, `None` when the index points nowhere.
    pub fn current_network(&self) -> StorageResult<Option<Network>> {
        let index = self.last_selected_network_index()?;
        Ok(self.networks()?.into_iter().nth(index))
    }

    // =========================================================================
    // Website grants
    // =========================================================================

    pub fn website_account_ids(&self, origin: &str) -> StorageResult<Vec<String>> {
        let data: Option<WebsitesData> = self.store.get_json(WEBSITES_DATA_KEY)?;
        Ok(data
            .and_then(|mut d| d.remove(&origin.to_lowercase()))
            .unwrap_or_default())
    }

    pub fn set_website_account_ids(&self, origin: &str, account_ids: Vec<String>) -> StorageResult<()> {
        let key = origin.to_lowercase();
        self.store.update_json::<WebsitesData, _>(WEBSITES_DATA_KEY, |data| {
            let mut data = data.unwrap_or_default();
            data.insert(key, account_ids);
            data
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StorageArea};
    use serde_json::json;

    fn local() -> LocalStore {
        LocalStore::new(Arc::new(MemoryStore::new(StorageArea::Local)))
    }

    fn account(id: &str) -> Account {
        Account {
            account_id: id.to_string(),
            public_key: None,
            encrypted_private_key: None,
            is_ledger: false,
            tokens: vec![],
        }
    }

    fn localnet() -> Network {
        Network {
            network_id: "localnet".into(),
            node_url: "http://127.0.0.1:3030".into(),
            explorer_url: String::new(),
            indexer_url: String::new(),
            wallet_url: String::new(),
            helper_url: String::new(),
        }
    }

    #[test]
    fn default_network_is_testnet() {
        let local = local();
        let network = local.current_network().unwrap().unwrap();
        assert_eq!(network.network_id, "testnet");
        assert_eq!(network.node_url, "https://rpc.testnet.near.org");
    }

    #[test]
    fn custom_networks_follow_builtins() {
        let local = local();
        assert!(local.add_custom_network(localnet()).unwrap());
        assert!(!local.add_custom_network(localnet()).unwrap());

        let ids: Vec<String> = local.networks().unwrap().into_iter().map(|n| n.network_id).collect();
        assert_eq!(ids, vec!["testnet", "mainnet", "localnet"]);

        assert!(local.select_network_by_id("localnet").unwrap());
        assert_eq!(local.last_selected_network_index().unwrap(), 2);
        assert!(!local.select_network_by_id("betanet").unwrap());
    }

    #[test]
    fn dangling_network_index_resolves_to_none() {
        let local = local();
        local.select_network(9).unwrap();
        assert_eq!(local.current_network().unwrap(), None);
    }

    #[test]
    fn accounts_are_appended_and_selected() {
        let local = local();
        assert_eq!(local.add_account(account("alice.testnet")).unwrap(), 0);
        assert_eq!(local.add_account(account("bob.testnet")).unwrap(), 1);
        assert_eq!(local.add_account(account("alice.testnet")).unwrap(), 0);

        assert_eq!(local.accounts().unwrap().len(), 2);
        assert_eq!(local.current_account().unwrap().unwrap().account_id, "alice.testnet");
    }

    #[test]
    fn public_key_is_only_filled_in_once() {
        let local = local();
        local.add_account(account("alice.testnet")).unwrap();
        assert!(local.set_account_public_key("alice.testnet", "ed25519:one").unwrap());
        assert!(!local.set_account_public_key("alice.testnet", "ed25519:two").unwrap());
        assert_eq!(
            local.accounts().unwrap()[0].public_key.as_deref(),
            Some("ed25519:one")
        );
    }

    #[test]
    fn tokens_are_deduplicated_by_contract() {
        let local = local();
        local.add_account(account("alice.testnet")).unwrap();
        let token = Token {
            address: "usdc.testnet".into(),
            symbol: "USDC".into(),
            decimals: 6,
            name: None,
            icon: None,
        };
        assert!(local.add_token("alice.testnet", token.clone()).unwrap());
        assert!(!local.add_token("alice.testnet", token).unwrap());
        assert_eq!(local.accounts().unwrap()[0].tokens.len(), 1);
    }

    #[test]
    fn website_grants_are_keyed_by_lowercase_origin() {
        let local = local();
        local
            .set_website_account_ids("https://App.Example", vec!["alice.testnet".into()])
            .unwrap();

        assert_eq!(local.website_account_ids("https://app.example").unwrap(), vec!["alice.testnet"]);
        assert!(local.website_account_ids("https://other.example").unwrap().is_empty());

        let raw = local.raw().get(WEBSITES_DATA_KEY).unwrap().unwrap();
        assert_eq!(raw, json!({"https://app.example": ["alice.testnet"]}));
    }
}
