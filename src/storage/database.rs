// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable key-value area backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `kv`: storage key → JSON-encoded value bytes
//!
//! redb serializes write transactions, so [`KeyValueStore::update`] reads and
//! writes inside one write transaction and is atomic across contexts sharing
//! the same handle.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{ChangeFeed, KeyValueStore, StorageArea, StorageChange, StorageResult};

// =============================================================================
// Table Definitions
// =============================================================================

/// Storage key → serialized JSON value.
const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

// =============================================================================
// RedbStore
// =============================================================================

pub struct RedbStore {
    db: Database,
    feed: ChangeFeed,
}

impl RedbStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create the table so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(KV)?;
        }
        write_txn.commit()?;

        debug!(path = %path.display(), "Opened durable extension store");

        Ok(Self {
            db,
            feed: ChangeFeed::new(StorageArea::Local),
        })
    }

    /// Apply `apply` to the current value inside a single write transaction.
    fn write_with(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> StorageResult<(Option<Value>, Option<Value>)> {
        let write_txn = self.db.begin_write()?;
        let (old, new) = {
            let mut table = write_txn.open_table(KV)?;
            let old = match table.get(key)? {
                Some(guard) => Some(serde_json::from_slice::<Value>(guard.value())?),
                None => None,
            };
            let new = apply(old.clone());
            match &new {
                Some(value) => {
                    let bytes = serde_json::to_vec(value)?;
                    table.insert(key, bytes.as_slice())?;
                }
                None => {
                    table.remove(key)?;
                }
            }
            (old, new)
        };
        write_txn.commit()?;
        Ok((old, new))
    }
}

impl KeyValueStore for RedbStore {
    fn area(&self) -> StorageArea {
        self.feed.area()
    }

    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KV)?;
        match table.get(key)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let mut value = Some(value);
        let (old, new) = self.write_with(key, &mut |_| value.take())?;
        self.feed.publish(key, old, new);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let (old, new) = self.write_with(key, &mut |_| None)?;
        self.feed.publish(key, old, new);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> StorageResult<Option<Value>> {
        let (old, new) = self.write_with(key, apply)?;
        self.feed.publish(key, old, new.clone());
        Ok(new)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn temp_store() -> (tempfile::TempDir, RedbStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&dir.path().join("local.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local.redb");

        {
            let store = RedbStore::open(&path).unwrap();
            store
                .set("websitesData", json!({"https://app.example": ["alice.testnet"]}))
                .unwrap();
        }

        let store = RedbStore::open(&path).unwrap();
        let data = store.get("websitesData").unwrap().unwrap();
        assert_eq!(
            data["https://app.example"][0],
            json!("alice.testnet")
        );
    }

    #[test]
    fn remove_deletes_and_notifies() {
        let (_dir, store) = temp_store();
        let mut rx = store.subscribe();

        store.set("lastSelectedNetworkIndex", json!(1)).unwrap();
        store.remove("lastSelectedNetworkIndex").unwrap();
        // Removing a missing key is silent.
        store.remove("lastSelectedNetworkIndex").unwrap();

        assert_eq!(store.get("lastSelectedNetworkIndex").unwrap(), None);
        assert_eq!(rx.try_recv().unwrap().new_value, Some(json!(1)));
        let removed = rx.try_recv().unwrap();
        assert_eq!(removed.area, StorageArea::Local);
        assert_eq!(removed.old_value, Some(json!(1)));
        assert_eq!(removed.new_value, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let (_dir, store) = temp_store();
        let store: Arc<dyn KeyValueStore> = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        store
                            .update_json::<Vec<String>, _>("customNetworks", |list| {
                                let mut list = list.unwrap_or_default();
                                list.push(format!("net-{i}-{j}"));
                                list
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let list: Vec<String> = store.get_json("customNetworks").unwrap().unwrap();
        assert_eq!(list.len(), 40);
    }
}
