// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session area: the unlock password and pending approval records.
//!
//! A pending approval lives under `transactionsData[<uuid>]` from the moment
//! the background opens an approval popup until it reads the decision back.
//! `isApproved` stays unset until the popup writes the user's answer, and an
//! unset answer counts as a rejection.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{KeyValueStore, StorageResult};
use crate::blockchain::TransactionIntent;
use crate::models::{SignInParams, SignOutParams};

pub const PASSWORD_KEY: &str = "password";
pub const TRANSACTIONS_DATA_KEY: &str = "transactionsData";

/// Kind of operation an approval popup is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    SignTransactions,
    SignIn,
    SignOut,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignTransactions => "signTransactions",
            Self::SignIn => "signIn",
            Self::SignOut => "signOut",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signTransactions" => Ok(Self::SignTransactions),
            "signIn" => Ok(Self::SignIn),
            "signOut" => Ok(Self::SignOut),
            other => Err(format!("unknown operation type {other}")),
        }
    }
}

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationPayload {
    Transactions(Vec<TransactionIntent>),
    SignIn(SignInParams),
    SignOut(SignOutParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub uuid: Uuid,
    pub data_type: OperationType,
    pub data: OperationPayload,
    #[serde(default)]
    pub is_approved: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl PendingApproval {
    pub fn new(data_type: OperationType, data: OperationPayload) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            data_type,
            data,
            is_approved: None,
            created_at: Utc::now(),
        }
    }
}

type PendingMap = HashMap<Uuid, PendingApproval>;

/// Typed access to the session area.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn raw(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Session password; `None` means the wallet is locked.
    pub fn password(&self) -> StorageResult<Option<String>> {
        self.store.get_json(PASSWORD_KEY)
    }

    pub fn set_password(&self, password: &str) -> StorageResult<()> {
        self.store.set_json(PASSWORD_KEY, &password)
    }

    pub fn clear_password(&self) -> StorageResult<()> {
        self.store.remove(PASSWORD_KEY)
    }

    pub fn add_pending(&self, record: &PendingApproval) -> StorageResult<()> {
        self.store.update_json::<PendingMap, _>(TRANSACTIONS_DATA_KEY, |map| {
            let mut map = map.unwrap_or_default();
            map.insert(record.uuid, record.clone());
            map
        })?;
        Ok(())
    }

    pub fn pending(&self, uuid: &Uuid) -> StorageResult<Option<PendingApproval>> {
        let map: Option<PendingMap> = self.store.get_json(TRANSACTIONS_DATA_KEY)?;
        Ok(map.and_then(|mut m| m.remove(uuid)))
    }

    /// Record the user's decision. Returns the updated record, or `None`
    /// when the record is gone.
    pub fn set_approval(&self, uuid: &Uuid, approved: bool) -> StorageResult<Option<PendingApproval>> {
        let mut updated = None;
        self.store.update_json::<PendingMap, _>(TRANSACTIONS_DATA_KEY, |map| {
            let mut map = map.unwrap_or_default();
            if let Some(record) = map.get_mut(uuid) {
                record.is_approved = Some(approved);
                updated = Some(record.clone());
            }
            map
        })?;
        Ok(updated)
    }

    /// Remove a record and return it. Each record is taken at most once.
    pub fn take_pending(&self, uuid: &Uuid) -> StorageResult<Option<PendingApproval>> {
        let mut taken = None;
        self.store.update_json::<PendingMap, _>(TRANSACTIONS_DATA_KEY, |map| {
            let mut map = map.unwrap_or_default();
            taken = map.remove(uuid);
            map
        })?;
        Ok(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Action;
    use crate::storage::MemoryStore;

    fn session() -> SessionStore {
        SessionStore::new(Arc::new(MemoryStore::session()))
    }

    fn transfer_record() -> PendingApproval {
        PendingApproval::new(
            OperationType::SignTransactions,
            OperationPayload::Transactions(vec![TransactionIntent::new(
                "alice.testnet",
                "bob.testnet",
                [Action::transfer(1)],
            )]),
        )
    }

    #[test]
    fn password_set_and_clear() {
        let session = session();
        assert_eq!(session.password().unwrap(), None);
        session.set_password("pw").unwrap();
        assert_eq!(session.password().unwrap().as_deref(), Some("pw"));
        session.clear_password().unwrap();
        assert_eq!(session.password().unwrap(), None);
    }

    #[test]
    fn pending_record_lifecycle() {
        let session = session();
        let record = transfer_record();
        session.add_pending(&record).unwrap();

        let stored = session.pending(&record.uuid).unwrap().unwrap();
        assert_eq!(stored.is_approved, None);
        assert_eq!(stored.data, record.data);

        let approved = session.set_approval(&record.uuid, true).unwrap().unwrap();
        assert_eq!(approved.is_approved, Some(true));

        let taken = session.take_pending(&record.uuid).unwrap().unwrap();
        assert_eq!(taken.is_approved, Some(true));
        assert_eq!(session.take_pending(&record.uuid).unwrap(), None);
    }

    #[test]
    fn approval_on_missing_record_is_a_no_op() {
        let session = session();
        assert_eq!(session.set_approval(&Uuid::new_v4(), true).unwrap(), None);
    }

    #[test]
    fn concurrent_records_are_independent() {
        let session = session();
        let a = transfer_record();
        let b = transfer_record();
        session.add_pending(&a).unwrap();
        session.add_pending(&b).unwrap();

        session.set_approval(&a.uuid, false).unwrap();
        assert_eq!(session.pending(&b.uuid).unwrap().unwrap().is_approved, None);
        assert_eq!(session.take_pending(&a.uuid).unwrap().unwrap().is_approved, Some(false));
        assert!(session.pending(&b.uuid).unwrap().is_some());
    }

    #[test]
    fn payload_kinds_decode_to_the_right_variant() {
        let sign_out: OperationPayload =
            serde_json::from_str(r#"{"accounts":[{"accountId":"a.testnet","publicKey":"k"}]}"#).unwrap();
        assert!(matches!(sign_out, OperationPayload::SignOut(_)));

        let sign_in: OperationPayload = serde_json::from_str(
            r#"{"permission":{"receiverId":"dao.testnet"},"accounts":[]}"#,
        )
        .unwrap();
        assert!(matches!(sign_in, OperationPayload::SignIn(_)));
        assert_eq!("signIn".parse::<OperationType>().unwrap(), OperationType::SignIn);
    }
}
