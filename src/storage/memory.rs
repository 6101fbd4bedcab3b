// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory key-value area. Backs the session area (cleared on restart)
//! and stands in for the durable area in tests.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::broadcast;

use super::{ChangeFeed, KeyValueStore, StorageArea, StorageChange, StorageError, StorageResult};

pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new(area: StorageArea) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            feed: ChangeFeed::new(area),
        }
    }

    pub fn session() -> Self {
        Self::new(StorageArea::Session)
    }
}

impl KeyValueStore for MemoryStore {
    fn area(&self) -> StorageArea {
        self.feed.area()
    }

    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let values = self.values.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let old = {
            let mut values = self.values.lock().map_err(|_| StorageError::Poisoned)?;
            values.insert(key.to_string(), value.clone())
        };
        self.feed.publish(key, old, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let old = {
            let mut values = self.values.lock().map_err(|_| StorageError::Poisoned)?;
            values.remove(key)
        };
        self.feed.publish(key, old, None);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> StorageResult<Option<Value>> {
        let (old, new) = {
            let mut values = self.values.lock().map_err(|_| StorageError::Poisoned)?;
            let old = values.get(key).cloned();
            let new = apply(old.clone());
            match &new {
                Some(value) => {
                    values.insert(key.to_string(), value.clone());
                }
                None => {
                    values.remove(key);
                }
            }
            (old, new)
        };
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

    #[test]
    fn set_get_remove() {
        let store = MemoryStore::session();
        assert_eq!(store.get("password").unwrap(), None);

        store.set("password", json!("hunter2")).unwrap();
        assert_eq!(store.get("password").unwrap(), Some(json!("hunter2")));

        store.remove("password").unwrap();
        assert_eq!(store.get("password").unwrap(), None);
    }

    #[test]
    fn writes_publish_changes_with_old_and_new_values() {
        let store = MemoryStore::session();
        let mut rx = store.subscribe();

        store.set("password", json!("a")).unwrap();
        store.set("password", json!("b")).unwrap();
        store.remove("password").unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.area, StorageArea::Session);
        assert_eq!(first.old_value, None);
        assert_eq!(first.new_value, Some(json!("a")));

        let second = rx.try_recv().unwrap();
        assert_eq!(second.old_value, Some(json!("a")));
        assert_eq!(second.new_value, Some(json!("b")));

        let third = rx.try_recv().unwrap();
        assert_eq!(third.new_value, None);
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(StorageArea::Local));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store
                            .update_json::<u64, _>("counter", |n| n.unwrap_or(0) + 1)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total: Option<u64> = store.get_json("counter").unwrap();
        assert_eq!(total, Some(800));
    }
}
