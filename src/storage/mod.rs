// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Extension Storage
//!
//! Two key-value areas shared by every context:
//!
//! | Area | Lifetime | Backend | Keys |
//! |------|----------|---------|------|
//! | Local | Durable | [`RedbStore`] | `hashedPassword`, `accounts`, `lastSelectedAccountIndex`, `websitesData`, `customNetworks`, `lastSelectedNetworkIndex` |
//! | Session | Cleared on restart | [`MemoryStore`] | `password`, `transactionsData` |
//!
//! Values are JSON. Each store publishes a [`StorageChange`] for every write
//! that alters a value, which is how contexts learn about each other's writes.
//! [`KeyValueStore::update`] is an atomic read-modify-write of one key.

pub mod cipher;
pub mod database;
pub mod local;
pub mod memory;
pub mod session;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

pub use cipher::{AesGcmCipher, CipherError, KeyCipher};
pub use database::RedbStore;
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use session::{OperationPayload, OperationType, PendingApproval, SessionStore};

/// Capacity of each store's change feed.
const CHANGE_FEED_CAPACITY: usize = 256;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("update of key {0} was not applied")]
    UpdateNotApplied(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// Change Feed
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    Local,
    Session,
}

/// One committed write that changed a key's value.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub area: StorageArea,
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Broadcast side of a store's change feed.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    area: StorageArea,
    sender: broadcast::Sender<StorageChange>,
}

impl ChangeFeed {
    pub fn new(area: StorageArea) -> Self {
        let (sender, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { area, sender }
    }

    pub fn area(&self) -> StorageArea {
        self.area
    }

    /// Publish a change if the value actually moved.
    pub fn publish(&self, key: &str, old_value: Option<Value>, new_value: Option<Value>) {
        if old_value == new_value {
            return;
        }
        // No subscribers is fine.
        let _ = self.sender.send(StorageChange {
            area: self.area,
            key: key.to_string(),
            old_value,
            new_value,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.sender.subscribe()
    }
}

// =============================================================================
// KeyValueStore
// =============================================================================

/// Key-value area holding JSON values.
pub trait KeyValueStore: Send + Sync {
    fn area(&self) -> StorageArea;

    fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    fn set(&self, key: &str, value: Value) -> StorageResult<()>;

    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Atomically replace the value of `key` with `apply(current)`.
    ///
    /// Returning `None` removes the key. No other write to the same store
    /// interleaves between the read and the write.
    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> StorageResult<Option<Value>>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

impl dyn KeyValueStore {
    /// Read and decode a typed value.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        self.get(key)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(StorageError::from)
    }

    /// Encode and write a typed value.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        self.set(key, serde_json::to_value(value)?)
    }

    /// Typed atomic read-modify-write. Returns the value written.
    pub fn update_json<T, F>(&self, key: &str, apply: F) -> StorageResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        let mut apply = Some(apply);
        let mut outcome: Option<StorageResult<T>> = None;

        self.update(key, &mut |current| {
            let Some(apply) = apply.take() else {
                return current;
            };
            let decoded = match current.clone().map(serde_json::from_value::<T>).transpose() {
                Ok(decoded) => decoded,
                Err(e) => {
                    outcome = Some(Err(e.into()));
                    return current;
                }
            };
            let next = apply(decoded);
            match serde_json::to_value(&next) {
                Ok(value) => {
                    outcome = Some(Ok(next));
                    Some(value)
                }
                Err(e) => {
                    outcome = Some(Err(e.into()));
                    current
                }
            }
        })?;

        outcome.unwrap_or_else(|| Err(StorageError::UpdateNotApplied(key.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn typed_helpers_round_trip_through_json() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(StorageArea::Local));
        store.set_json("customNetworks", &vec!["localnet"]).unwrap();

        let networks: Option<Vec<String>> = store.get_json("customNetworks").unwrap();
        assert_eq!(networks, Some(vec!["localnet".to_string()]));
    }

    #[test]
    fn update_json_reports_decode_failures_without_writing() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(StorageArea::Local));
        store.set("lastSelectedAccountIndex", json!("not a number")).unwrap();

        let result = store.update_json::<u64, _>("lastSelectedAccountIndex", |n| n.unwrap_or(0) + 1);
        assert!(matches!(result, Err(StorageError::Serde(_))));
        assert_eq!(
            store.get("lastSelectedAccountIndex").unwrap(),
            Some(json!("not a number"))
        );
    }

    #[test]
    fn change_feed_skips_no_op_writes() {
        let feed = ChangeFeed::new(StorageArea::Session);
        let mut rx = feed.subscribe();

        feed.publish("password", Some(json!("a")), Some(json!("a")));
        feed.publish("password", Some(json!("a")), None);

        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, "password");
        assert_eq!(change.new_value, None);
        assert!(rx.try_recv().is_err());
    }
}
