// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction actions: the page-facing wire form and the typed borsh form.
//!
//! On the wire an action is `{"enum": "<kind>", "<kind>": {...payload}}`.
//! Translation to [`Action`] fails with [`WalletError::UnsupportedAction`]
//! for unknown kinds and malformed payloads. It never drops an action.
//!
//! | Kind | Borsh tag |
//! |------|-----------|
//! | `createAccount` | 0 |
//! | `deployContract` | 1 |
//! | `functionCall` | 2 |
//! | `transfer` | 3 |
//! | `stake` | 4 |
//! | `addKey` | 5 |
//! | `deleteKey` | 6 |
//! | `deleteAccount` | 7 |

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use super::keys::PublicKey;
use super::types::{dec_format, Balance, Gas};
use crate::error::WalletError;

// =============================================================================
// Wire form
// =============================================================================

/// Action as sent by pages and shown by the approval popup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireAction {
    #[serde(rename = "enum")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl WireAction {
    /// Payload stored under the kind's own key (`{}` when absent).
    pub fn payload(&self) -> Value {
        self.fields
            .get(&self.kind)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    fn new(kind: &str, payload: Value) -> Self {
        let mut fields = Map::new();
        fields.insert(kind.to_string(), payload);
        Self {
            kind: kind.to_string(),
            fields,
        }
    }
}

// =============================================================================
// Typed form
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FunctionCallPermission {
    pub allowance: Option<Balance>,
    pub receiver_id: String,
    pub method_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AccessKeyPermission {
    FunctionCall(FunctionCallPermission),
    FullAccess,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccessKey {
    pub nonce: u64,
    pub permission: AccessKeyPermission,
}

/// Action in NEAR's canonical order. Serde goes through [`WireAction`].
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(into = "WireAction", try_from = "WireAction")]
pub enum Action {
    CreateAccount,
    DeployContract {
        code: Vec<u8>,
    },
    FunctionCall {
        method_name: String,
        args: Vec<u8>,
        gas: Gas,
        deposit: Balance,
    },
    Transfer {
        deposit: Balance,
    },
    Stake {
        stake: Balance,
        public_key: PublicKey,
    },
    AddKey {
        public_key: PublicKey,
        access_key: AccessKey,
    },
    DeleteKey {
        public_key: PublicKey,
    },
    DeleteAccount {
        beneficiary_id: String,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateAccount => "createAccount",
            Self::DeployContract { .. } => "deployContract",
            Self::FunctionCall { .. } => "functionCall",
            Self::Transfer { .. } => "transfer",
            Self::Stake { .. } => "stake",
            Self::AddKey { .. } => "addKey",
            Self::DeleteKey { .. } => "deleteKey",
            Self::DeleteAccount { .. } => "deleteAccount",
        }
    }

    pub fn transfer(deposit: Balance) -> Self {
        Self::Transfer { deposit }
    }

    pub fn function_call(method_name: impl Into<String>, args: Vec<u8>, gas: Gas, deposit: Balance) -> Self {
        Self::FunctionCall {
            method_name: method_name.into(),
            args,
            gas,
            deposit,
        }
    }

    /// Function-call access key with a fresh nonce.
    pub fn add_function_call_key(
        public_key: PublicKey,
        receiver_id: impl Into<String>,
        method_names: Vec<String>,
        allowance: Option<Balance>,
    ) -> Self {
        Self::AddKey {
            public_key,
            access_key: AccessKey {
                nonce: 0,
                permission: AccessKeyPermission::FunctionCall(FunctionCallPermission {
                    allowance,
                    receiver_id: receiver_id.into(),
                    method_names,
                }),
            },
        }
    }

    pub fn delete_key(public_key: PublicKey) -> Self {
        Self::DeleteKey { public_key }
    }
}

// =============================================================================
// Wire payloads
// =============================================================================

#[derive(Deserialize)]
struct DeployContractPayload {
    code: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionCallPayload {
    method_name: String,
    #[serde(default, deserialize_with = "args_bytes")]
    args: Vec<u8>,
    #[serde(with = "dec_format")]
    gas: Gas,
    #[serde(default, with = "dec_format")]
    deposit: Balance,
}

#[derive(Deserialize)]
struct TransferPayload {
    #[serde(with = "dec_format")]
    deposit: Balance,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StakePayload {
    #[serde(with = "dec_format")]
    stake: Balance,
    public_key: PublicKey,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddKeyPayload {
    public_key: PublicKey,
    access_key: AccessKeyPayload,
}

#[derive(Deserialize)]
struct AccessKeyPayload {
    #[serde(default, with = "dec_format")]
    nonce: u64,
    permission: PermissionPayload,
}

#[derive(Deserialize)]
#[serde(tag = "enum", rename_all = "camelCase")]
enum PermissionPayload {
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCallPermissionPayload,
    },
    FullAccess {},
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionCallPermissionPayload {
    receiver_id: String,
    #[serde(default)]
    method_names: Vec<String>,
    #[serde(default, with = "dec_format::option")]
    allowance: Option<Balance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteKeyPayload {
    public_key: PublicKey,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteAccountPayload {
    beneficiary_id: String,
}

/// Function-call args arrive as raw bytes, a string, or a JSON value that
/// gets encoded as JSON text.
fn args_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s.into_bytes()),
        Value::Array(items) if items.iter().all(|v| v.as_u64().is_some_and(|n| n <= 255)) => {
            Ok(items.iter().filter_map(Value::as_u64).map(|n| n as u8).collect())
        }
        other => serde_json::to_vec(&other).map_err(serde::de::Error::custom),
    }
}

fn decode<T: DeserializeOwned>(wire: &WireAction) -> Result<T, WalletError> {
    serde_json::from_value(wire.payload())
        .map_err(|e| WalletError::UnsupportedAction(format!("malformed {} action: {e}", wire.kind)))
}

impl TryFrom<&WireAction> for Action {
    type Error = WalletError;

    fn try_from(wire: &WireAction) -> Result<Self, Self::Error> {
        let action = match wire.kind.as_str() {
            "createAccount" => Action::CreateAccount,
            "deployContract" => {
                let p: DeployContractPayload = decode(wire)?;
                Action::DeployContract { code: p.code }
            }
            "functionCall" => {
                let p: FunctionCallPayload = decode(wire)?;
                Action::FunctionCall {
                    method_name: p.method_name,
                    args: p.args,
                    gas: p.gas,
                    deposit: p.deposit,
                }
            }
            "transfer" => {
                let p: TransferPayload = decode(wire)?;
                Action::Transfer { deposit: p.deposit }
            }
            "stake" => {
                let p: StakePayload = decode(wire)?;
                Action::Stake {
                    stake: p.stake,
                    public_key: p.public_key,
                }
            }
            "addKey" => {
                let p: AddKeyPayload = decode(wire)?;
                let permission = match p.access_key.permission {
                    PermissionPayload::FullAccess {} => AccessKeyPermission::FullAccess,
                    PermissionPayload::FunctionCall { function_call } => {
                        AccessKeyPermission::FunctionCall(FunctionCallPermission {
                            allowance: function_call.allowance,
                            receiver_id: function_call.receiver_id,
                            method_names: function_call.method_names,
                        })
                    }
                };
                Action::AddKey {
                    public_key: p.public_key,
                    access_key: AccessKey {
                        nonce: p.access_key.nonce,
                        permission,
                    },
                }
            }
            "deleteKey" => {
                let p: DeleteKeyPayload = decode(wire)?;
                Action::DeleteKey {
                    public_key: p.public_key,
                }
            }
            "deleteAccount" => {
                let p: DeleteAccountPayload = decode(wire)?;
                Action::DeleteAccount {
                    beneficiary_id: p.beneficiary_id,
                }
            }
            other => return Err(WalletError::UnsupportedAction(other.to_string())),
        };
        Ok(action)
    }
}

impl TryFrom<WireAction> for Action {
    type Error = WalletError;

    fn try_from(wire: WireAction) -> Result<Self, Self::Error> {
        Action::try_from(&wire)
    }
}

impl From<&Action> for WireAction {
    fn from(action: &Action) -> Self {
        let payload = match action {
            Action::CreateAccount => json!({}),
            Action::DeployContract { code } => json!({ "code": code }),
            Action::FunctionCall {
                method_name,
                args,
                gas,
                deposit,
            } => json!({
                "methodName": method_name,
                "args": args,
                "gas": gas.to_string(),
                "deposit": deposit.to_string(),
            }),
            Action::Transfer { deposit } => json!({ "deposit": deposit.to_string() }),
            Action::Stake { stake, public_key } => json!({
                "stake": stake.to_string(),
                "publicKey": public_key.to_string(),
            }),
            Action::AddKey {
                public_key,
                access_key,
            } => {
                let permission = match &access_key.permission {
                    AccessKeyPermission::FullAccess => {
                        json!({ "enum": "fullAccess", "fullAccess": {} })
                    }
                    AccessKeyPermission::FunctionCall(p) => json!({
                        "enum": "functionCall",
                        "functionCall": {
                            "receiverId": p.receiver_id,
                            "methodNames": p.method_names,
                            "allowance": p.allowance.map(|a| a.to_string()),
                        }
                    }),
                };
                json!({
                    "publicKey": public_key.to_string(),
                    "accessKey": { "nonce": access_key.nonce.to_string(), "permission": permission },
                })
            }
            Action::DeleteKey { public_key } => json!({ "publicKey": public_key.to_string() }),
            Action::DeleteAccount { beneficiary_id } => {
                json!({ "beneficiaryId": beneficiary_id })
            }
        };
        WireAction::new(action.kind(), payload)
    }
}

impl From<Action> for WireAction {
    fn from(action: Action) -> Self {
        WireAction::from(&action)
    }
}
