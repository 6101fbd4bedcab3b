// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction signing engine.
//!
//! Signs a batch of intents with the user's decrypted keys:
//!
//! 1. Resolve every signer and translate every action up front. Any miss
//!    fails the whole batch before the node is contacted.
//! 2. For each distinct signer, fetch the latest final block hash and the
//!    access key's on-chain nonce once, concurrently.
//! 3. The k-th transaction of a signer in the batch gets nonce
//!    `on_chain + k` (starting at 1). Nonces strictly increase in batch order.
//! 4. Sign `sha256(borsh(transaction))` with ed25519.
//!
//! A batch either yields one signed transaction per intent, in input order,
//! or an error.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::actions::Action;
use super::client::NearRpc;
use super::keys::{CryptoHash, PublicKey, SecretKey};
use super::transactions::{SignedTransaction, Transaction, TransactionIntent};
use crate::error::WalletError;
use crate::models::{AccountWithPrivateKey, ConnectedAccount, SignInParams, SignOutParams};

/// Decrypted key material for one signer.
#[derive(Debug, Clone)]
pub struct SigningAccount {
    pub account_id: String,
    pub secret_key: SecretKey,
}

impl SigningAccount {
    pub fn public_key(&self) -> PublicKey {
        self.secret_key.public_key()
    }
}

impl TryFrom<&AccountWithPrivateKey> for SigningAccount {
    type Error = WalletError;

    fn try_from(account: &AccountWithPrivateKey) -> Result<Self, Self::Error> {
        if account.is_ledger {
            return Err(WalletError::Signing(format!(
                "Account {} is a hardware wallet account and cannot sign in the extension",
                account.account_id
            )));
        }
        let raw = account.private_key.as_deref().ok_or_else(|| {
            WalletError::Signing(format!("Private key for account {} is unavailable", account.account_id))
        })?;
        Ok(Self {
            account_id: account.account_id.clone(),
            secret_key: raw.parse()?,
        })
    }
}

/// Per-signer chain context fetched once per batch.
struct SignerContext {
    block_hash: CryptoHash,
    nonce: u64,
}

pub struct SigningEngine {
    rpc: Arc<dyn NearRpc>,
}

impl SigningEngine {
    pub fn new(rpc: Arc<dyn NearRpc>) -> Self {
        Self { rpc }
    }

    /// Sign every intent, all-or-nothing.
    pub async fn sign_transactions(
        &self,
        accounts: &[AccountWithPrivateKey],
        intents: &[TransactionIntent],
    ) -> Result<Vec<SignedTransaction>, WalletError> {
        let mut prepared = Vec::with_capacity(intents.len());
        for intent in intents {
            let account = accounts
                .iter()
                .find(|a| a.account_id == intent.signer_id)
                .ok_or_else(|| WalletError::SignerNotFound(intent.signer_id.clone()))?;
            let signer = SigningAccount::try_from(account)?;
            let actions = intent.typed_actions()?;
            prepared.push((signer, intent.receiver_id.clone(), actions));
        }

        let signed = self.sign_prepared(prepared).await?;
        info!(count = signed.len(), "Signed transaction batch");
        Ok(signed)
    }

    /// Add a function-call access key to each account that is stored in the
    /// extension, then broadcast.
    pub async fn sign_in(
        &self,
        accounts: &[AccountWithPrivateKey],
        params: &SignInParams,
    ) -> Result<Vec<CryptoHash>, WalletError> {
        let permission = &params.permission;
        let prepared = self.self_addressed(accounts, &params.accounts, |key| {
            Action::add_function_call_key(
                key,
                permission.receiver_id.clone(),
                permission.method_names.clone(),
                permission.allowance,
            )
        })?;
        let signed = self.sign_prepared(prepared).await?;
        self.broadcast_all(&signed).await
    }

    /// Delete the account's access key from each listed account stored in
    /// the extension, then broadcast.
    pub async fn sign_out(
        &self,
        accounts: &[AccountWithPrivateKey],
        params: &SignOutParams,
    ) -> Result<Vec<CryptoHash>, WalletError> {
        let prepared = self.self_addressed(accounts, &params.accounts, Action::delete_key)?;
        let signed = self.sign_prepared(prepared).await?;
        self.broadcast_all(&signed).await
    }

    /// One single-action transaction per listed account, addressed to the
    /// account itself and carrying a key taken from the listing. Accounts
    /// the extension does not hold are skipped.
    fn self_addressed(
        &self,
        accounts: &[AccountWithPrivateKey],
        targets: &[ConnectedAccount],
        action: impl Fn(PublicKey) -> Action,
    ) -> Result<Vec<(SigningAccount, String, Vec<Action>)>, WalletError> {
        let mut prepared = Vec::new();
        for target in targets {
            let Some(stored) = accounts.iter().find(|a| a.account_id == target.account_id) else {
                warn!(account_id = %target.account_id, "Skipping account not held by the extension");
                continue;
            };
            let signer = SigningAccount::try_from(stored)?;
            let key: PublicKey = target.public_key.parse()?;
            prepared.push((signer.clone(), signer.account_id.clone(), vec![action(key)]));
        }
        Ok(prepared)
    }

    async fn sign_prepared(
        &self,
        prepared: Vec<(SigningAccount, String, Vec<Action>)>,
    ) -> Result<Vec<SignedTransaction>, WalletError> {
        let mut contexts: HashMap<(String, PublicKey), SignerContext> = HashMap::new();
        let mut signed = Vec::with_capacity(prepared.len());

        for (signer, receiver_id, actions) in prepared {
            let public_key = signer.public_key();
            let slot = (signer.account_id.clone(), public_key);
            if !contexts.contains_key(&slot) {
                let context = self.fetch_context(&signer.account_id, &public_key).await?;
                contexts.insert(slot.clone(), context);
            }
            let Some(context) = contexts.get_mut(&slot) else {
                continue;
            };
            context.nonce += 1;

            let transaction = Transaction {
                signer_id: signer.account_id.clone(),
                public_key,
                nonce: context.nonce,
                receiver_id,
                block_hash: context.block_hash,
                actions,
            };
            let hash = transaction.hash()?;
            let signature = signer.secret_key.sign(&hash.0)?;
            debug!(
                signer_id = %transaction.signer_id,
                receiver_id = %transaction.receiver_id,
                nonce = transaction.nonce,
                tx_hash = %hash,
                "Signed transaction"
            );
            signed.push(SignedTransaction::new(transaction, signature));
        }
        Ok(signed)
    }

    async fn fetch_context(&self, account_id: &str, public_key: &PublicKey) -> Result<SignerContext, WalletError> {
        let (block_hash, nonce) = tokio::try_join!(
            self.rpc.final_block_hash(),
            self.rpc.access_key_nonce(account_id, public_key),
        )?;
        Ok(SignerContext { block_hash, nonce })
    }

    async fn broadcast_all(&self, signed: &[SignedTransaction]) -> Result<Vec<CryptoHash>, WalletError> {
        let mut hashes = Vec::with_capacity(signed.len());
        for tx in signed {
            self.rpc.broadcast_tx_commit(tx).await?;
            let hash = tx.hash()?;
            info!(signer_id = %tx.transaction.signer_id, tx_hash = %hash, "Broadcast transaction");
            hashes.push(hash);
        }
        Ok(hashes)
    }
}
