// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared wallet state handed to every context.
//!
//! Wraps the two storage areas and the key cipher, and derives the views
//! contexts need: decrypted accounts (only while unlocked) and the accounts
//! an origin is connected to.

use std::sync::Arc;

use tracing::{info, warn};

use crate::blockchain::keys::{implicit_account_id, PublicKey, SecretKey};
use crate::error::WalletError;
use crate::models::{Account, AccountWithPrivateKey, ConnectedAccount, Network, NetworkInfo};
use crate::storage::cipher::{hash_password, verify_password};
use crate::storage::{AesGcmCipher, KeyCipher, KeyValueStore, LocalStore, SessionStore};

#[derive(Clone)]
pub struct WalletState {
    pub local: LocalStore,
    pub session: SessionStore,
    pub cipher: Arc<dyn KeyCipher>,
}

impl WalletState {
    pub fn new(local: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self::with_cipher(local, session, Arc::new(AesGcmCipher::new()))
    }

    pub fn with_cipher(
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        cipher: Arc<dyn KeyCipher>,
    ) -> Self {
        Self {
            local: LocalStore::new(local),
            session: SessionStore::new(session),
            cipher,
        }
    }

    // =========================================================================
    // Lock state
    // =========================================================================

    /// First-run setup: store the password hash and unlock.
    pub fn create_wallet(&self, password: &str) -> Result<(), WalletError> {
        let hashed = hash_password(password)?;
        self.local.set_hashed_password(&hashed)?;
        self.session.set_password(password)?;
        info!("Wallet created and unlocked");
        Ok(())
    }

    pub fn unlock(&self, password: &str) -> Result<(), WalletError> {
        let hashed = self.local.hashed_password()?.ok_or(WalletError::NotLoggedIn)?;
        if !verify_password(password, &hashed) {
            warn!("Unlock attempt with wrong password");
            return Err(WalletError::InvalidPassword);
        }
        self.session.set_password(password)?;
        info!("Wallet unlocked");
        Ok(())
    }

    pub fn lock(&self) -> Result<(), WalletError> {
        self.session.clear_password()?;
        info!("Wallet locked");
        Ok(())
    }

    pub fn is_unlocked(&self) -> Result<bool, WalletError> {
        Ok(self.session.password()?.is_some())
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Import an account whose key is held by the extension.
    pub fn import_account(&self, account_id: &str, secret_key: &SecretKey) -> Result<Account, WalletError> {
        let password = self.session.password()?.ok_or(WalletError::NotLoggedIn)?;
        let encrypted = self.cipher.encrypt(&password, &secret_key.to_string())?;
        let account = Account {
            account_id: account_id.to_string(),
            public_key: Some(secret_key.public_key().to_string()),
            encrypted_private_key: Some(encrypted),
            is_ledger: false,
            tokens: vec![],
        };
        self.local.add_account(account.clone())?;
        info!(account_id, "Imported account");
        Ok(account)
    }

    /// Register a hardware-wallet account (no key material).
    pub fn add_ledger_account(&self, account_id: &str, public_key: &PublicKey) -> Result<Account, WalletError> {
        let account = Account {
            account_id: account_id.to_string(),
            public_key: Some(public_key.to_string()),
            encrypted_private_key: None,
            is_ledger: true,
            tokens: vec![],
        };
        self.local.add_account(account.clone())?;
        info!(account_id, "Added hardware wallet account");
        Ok(account)
    }

    /// Decrypted accounts, or `None` when there are no accounts or the
    /// wallet is locked.
    ///
    /// Accounts not named for the current network are reported under their
    /// implicit id.
    pub fn accounts(&self) -> Result<Option<Vec<AccountWithPrivateKey>>, WalletError> {
        let stored = self.local.accounts()?;
        if stored.is_empty() {
            return Ok(None);
        }
        let Some(password) = self.session.password()? else {
            return Ok(None);
        };
        let network = self.local.current_network()?;
        Ok(Some(
            stored
                .into_iter()
                .map(|account| self.unlock_account(account, &password, network.as_ref()))
                .collect(),
        ))
    }

    fn unlock_account(
        &self,
        account: Account,
        password: &str,
        network: Option<&Network>,
    ) -> AccountWithPrivateKey {
        let private_key = match (&account.encrypted_private_key, account.is_ledger) {
            (Some(encrypted), false) => match self.cipher.decrypt(password, encrypted) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(account_id = %account.account_id, error = %e, "Failed to decrypt account key");
                    None
                }
            },
            _ => None,
        };

        let account_id = match (network, &account.public_key) {
            (Some(network), Some(public_key)) if !account.account_id.ends_with(&network.network_id) => {
                implicit_account_id(public_key).unwrap_or_else(|_| account.account_id.clone())
            }
            _ => account.account_id.clone(),
        };

        AccountWithPrivateKey {
            account_id,
            public_key: account.public_key,
            private_key,
            is_ledger: account.is_ledger,
            tokens: account.tokens,
        }
    }

    /// Accounts `origin` is connected to. Empty for an empty origin or a
    /// locked wallet.
    pub fn website_connected_accounts(&self, origin: &str) -> Result<Vec<ConnectedAccount>, WalletError> {
        if origin.is_empty() {
            return Ok(Vec::new());
        }
        let Some(accounts) = self.accounts()? else {
            return Ok(Vec::new());
        };
        let granted = self.local.website_account_ids(origin)?;

        Ok(granted
            .into_iter()
            .map(|id| {
                let found = accounts.iter().find(|a| {
                    a.account_id == id
                        || a
                            .public_key
                            .as_deref()
                            .and_then(|pk| implicit_account_id(pk).ok())
                            .is_some_and(|implicit| implicit == id)
                });
                match found {
                    Some(account) => ConnectedAccount {
                        account_id: account.account_id.clone(),
                        public_key: account.public_key.clone().unwrap_or_default(),
                    },
                    None => ConnectedAccount {
                        account_id: id,
                        public_key: String::new(),
                    },
                }
            })
            .collect())
    }

    /// Grant `origin` access to the given stored accounts. Accounts with a
    /// public key are recorded under their implicit id.
    pub fn connect_website(&self, origin: &str, accounts: &[Account]) -> Result<(), WalletError> {
        let ids = accounts
            .iter()
            .map(|a| match &a.public_key {
                Some(pk) => implicit_account_id(pk).unwrap_or_else(|_| a.account_id.clone()),
                None => a.account_id.clone(),
            })
            .collect();
        self.local.set_website_account_ids(origin, ids)?;
        Ok(())
    }

    pub fn disconnect_website(&self, origin: &str) -> Result<(), WalletError> {
        self.local.set_website_account_ids(origin, Vec::new())?;
        Ok(())
    }

    // =========================================================================
    // Network
    // =========================================================================

    pub fn current_network(&self) -> Result<Option<Network>, WalletError> {
        Ok(self.local.current_network()?)
    }

    /// Page view of the current network, the uninitialized placeholder when
    /// none resolves.
    pub fn network_info(&self) -> Result<NetworkInfo, WalletError> {
        Ok(self
            .current_network()?
            .map(|n| NetworkInfo::from(&n))
            .unwrap_or_else(NetworkInfo::uninitialized))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StorageArea};

    /// State on in-memory stores with a cheap cipher.
    pub(crate) fn test_state() -> WalletState {
        WalletState::with_cipher(
            Arc::new(MemoryStore::new(StorageArea::Local)),
            Arc::new(MemoryStore::session()),
            Arc::new(AesGcmCipher::with_iterations(1_000).unwrap()),
        )
    }

    /// Unlocked state holding the given accounts (seeded keys).
    pub(crate) fn unlocked_state(accounts: &[(&str, u8)]) -> WalletState {
        let state = test_state();
        state.session.set_password("pw").unwrap();
        state
            .local
            .set_hashed_password(&crate::storage::cipher::hash_password_with("pw", 1_000).unwrap())
            .unwrap();
        for (id, seed) in accounts {
            state
                .import_account(id, &SecretKey::from_seed([*seed; 32]).unwrap())
                .unwrap();
        }
        state
    }

    #[test]
    fn accounts_require_an_unlocked_wallet() {
        let state = unlocked_state(&[("alice.testnet", 1)]);
        assert!(state.accounts().unwrap().is_some());

        state.lock().unwrap();
        assert_eq!(state.accounts().unwrap(), None);

        state.unlock("pw").unwrap();
        let accounts = state.accounts().unwrap().unwrap();
        let key: SecretKey = accounts[0].private_key.as_deref().unwrap().parse().unwrap();
        assert_eq!(key, SecretKey::from_seed([1u8; 32]).unwrap());
    }

    #[test]
    fn wrong_password_does_not_unlock() {
        let state = unlocked_state(&[]);
        state.lock().unwrap();
        assert!(matches!(state.unlock("nope"), Err(WalletError::InvalidPassword)));
        assert!(!state.is_unlocked().unwrap());
    }

    #[test]
    fn no_accounts_means_none_even_when_unlocked() {
        let state = unlocked_state(&[]);
        assert_eq!(state.accounts().unwrap(), None);
    }

    #[test]
    fn foreign_network_accounts_use_implicit_ids() {
        let state = unlocked_state(&[("alice.testnet", 1), ("carol.near", 2)]);
        let accounts = state.accounts().unwrap().unwrap();

        assert_eq!(accounts[0].account_id, "alice.testnet");
        let implicit = SecretKey::from_seed([2u8; 32]).unwrap().public_key().implicit_account_id();
        assert_eq!(accounts[1].account_id, implicit);
    }

    #[test]
    fn import_requires_unlocked_wallet() {
        let state = test_state();
        let err = state
            .import_account("alice.testnet", &SecretKey::from_seed([1u8; 32]).unwrap())
            .unwrap_err();
        assert!(matches!(err, WalletError::NotLoggedIn));
    }

    #[test]
    fn connected_accounts_resolve_implicit_grants() {
        let state = unlocked_state(&[("alice.testnet", 1), ("bob.testnet", 2)]);
        let stored = state.local.accounts().unwrap();
        state.connect_website("https://app.example", &stored[..1]).unwrap();

        let connected = state.website_connected_accounts("https://app.example").unwrap();
        assert_eq!(
            connected,
            vec![ConnectedAccount {
                account_id: "alice.testnet".into(),
                public_key: stored[0].public_key.clone().unwrap(),
            }]
        );
        assert!(state.website_connected_accounts("").unwrap().is_empty());
        assert!(state.website_connected_accounts("https://other.example").unwrap().is_empty());
    }

    #[test]
    fn connected_accounts_are_hidden_while_locked() {
        let state = unlocked_state(&[("alice.testnet", 1)]);
        let stored = state.local.accounts().unwrap();
        state.connect_website("https://app.example", &stored).unwrap();

        state.lock().unwrap();
        assert!(state.website_connected_accounts("https://app.example").unwrap().is_empty());
    }

    #[test]
    fn ledger_accounts_never_carry_private_keys() {
        let state = unlocked_state(&[]);
        let key = SecretKey::from_seed([4u8; 32]).unwrap().public_key();
        state.add_ledger_account("cold.testnet", &key).unwrap();

        let accounts = state.accounts().unwrap().unwrap();
        assert!(accounts[0].is_ledger);
        assert_eq!(accounts[0].private_key, None);
    }

    #[test]
    fn network_info_falls_back_to_uninitialized() {
        let state = test_state();
        assert_eq!(state.network_info().unwrap().network_id, "testnet");
        state.local.select_network(7).unwrap();
        assert_eq!(state.network_info().unwrap(), NetworkInfo::uninitialized());
    }
}
