// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! NEAR protocol integration.
//!
//! This module provides functionality for:
//! - ed25519 keys, signatures and implicit account ids
//! - Translating page actions into borsh transactions
//! - Fetching block hashes and nonces over JSON-RPC
//! - Signing batches of transactions and broadcasting sign-in/out keys

pub mod actions;
pub mod client;
pub mod keys;
pub mod signing;
pub mod transactions;
pub mod types;

pub use actions::{Action, WireAction};
pub use client::{HttpRpcConnector, JsonRpcClient, NearRpc, RpcConnector, RpcError};
pub use keys::{CryptoHash, PublicKey, SecretKey, Signature};
pub use signing::SigningEngine;
pub use transactions::{SignedTransaction, Transaction, TransactionIntent};
pub use types::*;
