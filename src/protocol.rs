// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cross-Context Message Protocol
//!
//! Four contexts talk over two transports:
//!
//! | Hop | Transport | Type |
//! |-----|-----------|------|
//! | page ⇄ content script | window messages, any listener on the page sees them | [`PageBus`] |
//! | content script → background | one-shot request/response | [`RuntimePort`] |
//!
//! Page-level messages are [`Envelope`]s. A request carries the content-script
//! target, the reply carries the injected-API target, the same `id` and the
//! same `method`. Notifications (`should-update-*`) carry a fresh id and no
//! response.
//!
//! The background sees a [`RuntimeMessage`]: the envelope plus the origin the
//! browser reported for the sending page. The origin never comes from the
//! page's params.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::blockchain::TransactionIntent;
use crate::error::{ErrorResponse, WalletError};
use crate::models::{AccountWithPrivateKey, Network, SignInParams, SignOutParams};

pub const CONTENT_SCRIPT_TARGET: &str = "daoWallet#target-contentscript";
pub const INJECTED_API_TARGET: &str = "daoWallet#target-injectedAPI";

/// Event the injected API announces once its first state fetch finished.
pub const INITIALIZED_EVENT: &str = "daoWallet#event-initialized";

const PAGE_BUS_CAPACITY: usize = 256;

// =============================================================================
// Methods
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Connect,
    Disconnect,
    GetConnectedAccounts,
    GetNetwork,
    ShouldUpdateConnectedAccounts,
    ShouldUpdateNetwork,
    SignTransaction,
    SignTransactions,
    SignIn,
    SignOut,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::Connect,
        Method::Disconnect,
        Method::GetConnectedAccounts,
        Method::GetNetwork,
        Method::ShouldUpdateConnectedAccounts,
        Method::ShouldUpdateNetwork,
        Method::SignTransaction,
        Method::SignTransactions,
        Method::SignIn,
        Method::SignOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "daoWallet#method-connect",
            Self::Disconnect => "daoWallet#method-disconnect",
            Self::GetConnectedAccounts => "daoWallet#method-get-connected-accounts",
            Self::GetNetwork => "daoWallet#method-get-network",
            Self::ShouldUpdateConnectedAccounts => "daoWallet#method-should-update-connected-accounts",
            Self::ShouldUpdateNetwork => "daoWallet#method-should-update-network",
            Self::SignTransaction => "daoWallet#method-sign-transaction",
            Self::SignTransactions => "daoWallet#method-sign-transactions",
            Self::SignIn => "daoWallet#method-sign-in",
            Self::SignOut => "daoWallet#method-sign-out",
        }
    }

    /// Methods the content script sends unprompted to the page.
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::ShouldUpdateConnectedAccounts | Self::ShouldUpdateNetwork)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| WalletError::UnknownMethod(s.to_string()))
    }
}

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub target: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl Envelope {
    /// Page request addressed to the content script.
    pub fn request(method: Method, params: Option<Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target: CONTENT_SCRIPT_TARGET.to_string(),
            method: method.as_str().to_string(),
            params,
            response: None,
        }
    }

    /// Reply to this request, addressed to the injected API.
    pub fn reply(&self, response: Value) -> Self {
        Self {
            id: self.id.clone(),
            target: INJECTED_API_TARGET.to_string(),
            method: self.method.clone(),
            params: None,
            response: Some(response),
        }
    }

    /// Unsolicited notification for the injected API.
    pub fn notification(method: Method) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target: INJECTED_API_TARGET.to_string(),
            method: method.as_str().to_string(),
            params: None,
            response: None,
        }
    }

    pub fn parsed_method(&self) -> Result<Method, WalletError> {
        self.method.parse()
    }

    /// Decode params into a typed value. Missing params decode from `null`.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, WalletError> {
        serde_json::from_value(self.params.clone().unwrap_or(Value::Null))
            .map_err(|e| WalletError::InvalidMessage(format!("bad params for {}: {e}", self.method)))
    }
}

// =============================================================================
// Page bus (window messages)
// =============================================================================

/// Where a window message came from, relative to the receiving window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    /// Posted by the page's own window.
    SameWindow,
    /// Posted by another window or frame.
    Frame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowMessage {
    pub source: MessageSource,
    pub origin: String,
    pub data: Value,
}

impl WindowMessage {
    /// Decode the payload as an envelope, if it is one.
    pub fn envelope(&self) -> Option<Envelope> {
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// Window message channel of one page. Every subscriber sees every message.
#[derive(Debug, Clone)]
pub struct PageBus {
    origin: String,
    sender: broadcast::Sender<WindowMessage>,
}

impl PageBus {
    pub fn new(origin: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(PAGE_BUS_CAPACITY);
        Self {
            origin: origin.into(),
            sender,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// `window.postMessage` from the page's own window.
    pub fn post_message(&self, data: Value) {
        let _ = self.sender.send(WindowMessage {
            source: MessageSource::SameWindow,
            origin: self.origin.clone(),
            data,
        });
    }

    pub fn post_envelope(&self, envelope: &Envelope) {
        if let Ok(data) = serde_json::to_value(envelope) {
            self.post_message(data);
        }
    }

    /// Message arriving from an embedded frame or another window.
    pub fn post_from_frame(&self, origin: impl Into<String>, data: Value) {
        let _ = self.sender.send(WindowMessage {
            source: MessageSource::Frame,
            origin: origin.into(),
            data,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WindowMessage> {
        self.sender.subscribe()
    }
}

// =============================================================================
// Runtime channel (content script → background)
// =============================================================================

/// What the background receives: the page's envelope and the browser-reported
/// origin of the tab that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMessage {
    pub data: Envelope,
    pub origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionsData {
    pub network: Network,
    pub accounts: Vec<AccountWithPrivateKey>,
    pub transactions_options: Vec<TransactionIntent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInData {
    pub network: Network,
    pub accounts: Vec<AccountWithPrivateKey>,
    pub params: SignInParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignOutData {
    pub network: Network,
    pub accounts: Vec<AccountWithPrivateKey>,
    pub params: SignOutParams,
}

/// Work the background hands back to the content script after approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "methodData")]
pub enum ContentScriptTask {
    #[serde(rename = "daoWallet#contentScriptMethod-sign-transaction")]
    SignTransaction(SignTransactionsData),
    #[serde(rename = "daoWallet#contentScriptMethod-sign-transactions")]
    SignTransactions(SignTransactionsData),
    #[serde(rename = "daoWallet#contentScriptMethod-sign-in")]
    SignIn(SignInData),
    #[serde(rename = "daoWallet#contentScriptMethod-sign-out")]
    SignOut(SignOutData),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackgroundResponse {
    Error(ErrorResponse),
    ContentScript(ContentScriptTask),
    Data(Value),
}

impl From<WalletError> for BackgroundResponse {
    fn from(err: WalletError) -> Self {
        Self::Error(err.into())
    }
}

/// Background mailbox entry with its single reply slot.
#[derive(Debug)]
pub struct RuntimeRequest {
    pub message: RuntimeMessage,
    pub reply: oneshot::Sender<BackgroundResponse>,
}

/// Content-script side of the runtime channel.
#[derive(Debug, Clone)]
pub struct RuntimePort {
    sender: mpsc::Sender<RuntimeRequest>,
}

impl RuntimePort {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RuntimeRequest>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Send a message and wait for its single response.
    pub async fn send(&self, message: RuntimeMessage) -> Result<BackgroundResponse, WalletError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(RuntimeRequest { message, reply })
            .await
            .map_err(|_| WalletError::Transport("background is not running".into()))?;
        response
            .await
            .map_err(|_| WalletError::Transport("background dropped the request".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn method_names_round_trip() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        let err = "daoWallet#method-steal".parse::<Method>().unwrap_err();
        assert!(matches!(err, WalletError::UnknownMethod(_)));
    }

    #[test]
    fn reply_keeps_id_and_method_and_flips_target() {
        let request = Envelope::request(Method::GetNetwork, None);
        assert_eq!(request.target, CONTENT_SCRIPT_TARGET);

        let reply = request.reply(json!({"networkId": "testnet"}));
        assert_eq!(reply.id, request.id);
        assert_eq!(reply.method, request.method);
        assert_eq!(reply.target, INJECTED_API_TARGET);
    }

    #[test]
    fn notifications_have_no_response() {
        let note = Envelope::notification(Method::ShouldUpdateNetwork);
        let json = serde_json::to_value(&note).unwrap();
        assert!(json.get("response").is_none());
        assert!(Method::ShouldUpdateNetwork.is_notification());
        assert!(!Method::Connect.is_notification());
    }

    #[test]
    fn content_script_task_uses_method_and_method_data() {
        let task = ContentScriptTask::SignOut(SignOutData {
            network: Network::from(&crate::blockchain::NEAR_TESTNET),
            accounts: vec![],
            params: SignOutParams { accounts: vec![] },
        });
        let json = serde_json::to_value(BackgroundResponse::ContentScript(task)).unwrap();
        assert_eq!(json["method"], "daoWallet#contentScriptMethod-sign-out");
        assert_eq!(json["methodData"]["network"]["networkId"], "testnet");
    }

    #[test]
    fn background_response_decodes_errors_first() {
        let error: BackgroundResponse =
            serde_json::from_value(json!({"error": "User rejected request", "errorCode": "user_rejected"}))
                .unwrap();
        assert!(matches!(
            error,
            BackgroundResponse::Error(ErrorResponse { error_code: ErrorCode::UserRejected, .. })
        ));

        let data: BackgroundResponse = serde_json::from_value(json!([])).unwrap();
        assert!(matches!(data, BackgroundResponse::Data(_)));
    }

    #[test]
    fn non_envelope_window_data_is_ignored() {
        let bus = PageBus::new("https://app.example");
        let mut rx = bus.subscribe();
        bus.post_message(json!("hello"));
        let message = rx.try_recv().unwrap();
        assert_eq!(message.source, MessageSource::SameWindow);
        assert!(message.envelope().is_none());
    }

    #[tokio::test]
    async fn runtime_port_delivers_one_reply() {
        let (port, mut mailbox) = RuntimePort::channel(4);
        tokio::spawn(async move {
            let request = mailbox.recv().await.unwrap();
            assert_eq!(request.message.origin, "https://app.example");
            let _ = request.reply.send(BackgroundResponse::Data(json!([])));
        });

        let response = port
            .send(RuntimeMessage {
                data: Envelope::request(Method::GetConnectedAccounts, None),
                origin: "https://app.example".into(),
            })
            .await
            .unwrap();
        assert!(matches!(response, BackgroundResponse::Data(v) if v == json!([])));
    }

    #[tokio::test]
    async fn runtime_port_reports_dropped_requests() {
        let (port, mut mailbox) = RuntimePort::channel(1);
        tokio::spawn(async move {
            // Receive and drop without replying.
            let _ = mailbox.recv().await;
        });
        let err = port
            .send(RuntimeMessage {
                data: Envelope::request(Method::GetNetwork, None),
                origin: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Transport(_)));
    }
}
