// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! NEAR transactions: page intents, borsh transactions and signed results.
//!
//! A page sends a [`TransactionIntent`] (who signs, who receives, which
//! actions). The signing engine fills in the signer's public key, nonce and
//! a recent block hash, then signs `sha256(borsh(transaction))`.

use std::sync::OnceLock;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use super::actions::{Action, WireAction};
use super::keys::{CryptoHash, PublicKey, Signature};
use crate::error::WalletError;

/// Unsigned transaction request as sent by a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionIntent {
    pub signer_id: String,
    pub receiver_id: String,
    #[serde(default)]
    pub actions: Vec<WireAction>,
}

impl TransactionIntent {
    pub fn new(
        signer_id: impl Into<String>,
        receiver_id: impl Into<String>,
        actions: impl IntoIterator<Item = Action>,
    ) -> Self {
        Self {
            signer_id: signer_id.into(),
            receiver_id: receiver_id.into(),
            actions: actions.into_iter().map(WireAction::from).collect(),
        }
    }

    /// Translate every wire action. Any unsupported action fails the intent.
    pub fn typed_actions(&self) -> Result<Vec<Action>, WalletError> {
        self.actions.iter().map(Action::try_from).collect()
    }
}

/// Transaction in canonical borsh field order.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub signer_id: String,
    pub public_key: PublicKey,
    pub nonce: u64,
    pub receiver_id: String,
    pub block_hash: CryptoHash,
    pub actions: Vec<Action>,
}

impl Transaction {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WalletError> {
        borsh::to_vec(self).map_err(|e| WalletError::Signing(e.to_string()))
    }

    /// Hash that gets signed and identifies the transaction on chain.
    pub fn hash(&self) -> Result<CryptoHash, WalletError> {
        Ok(CryptoHash::digest(&self.to_bytes()?))
    }
}

/// Signed transaction. The serialized form is computed on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
    #[serde(skip)]
    encoded: OnceLock<Vec<u8>>,
}

impl SignedTransaction {
    pub fn new(transaction: Transaction, signature: Signature) -> Self {
        Self {
            transaction,
            signature,
            encoded: OnceLock::new(),
        }
    }

    /// Canonical borsh bytes (transaction followed by signature).
    pub fn encode(&self) -> Result<&[u8], WalletError> {
        if let Some(bytes) = self.encoded.get() {
            return Ok(bytes.as_slice());
        }
        let mut bytes = Vec::new();
        BorshSerialize::serialize(&self.transaction, &mut bytes)
            .and_then(|_| BorshSerialize::serialize(&self.signature, &mut bytes))
            .map_err(|e| WalletError::Signing(e.to_string()))?;
        Ok(self.encoded.get_or_init(|| bytes).as_slice())
    }

    pub fn hash(&self) -> Result<CryptoHash, WalletError> {
        self.transaction.hash()
    }
}

impl PartialEq for SignedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.transaction == other.transaction && self.signature == other.signature
    }
}

impl Eq for SignedTransaction {}
