// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Content-Script Bridge
//!
//! Sits between one page and the background:
//!
//! - decides whether the in-page API may be injected into a document,
//! - relays same-window requests to the background with the browser-reported
//!   origin attached,
//! - runs approved signing work locally and posts exactly one reply per request,
//! - turns storage changes into `should-update-*` notifications for the page.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::blockchain::{RpcConnector, SigningEngine};
use crate::error::{ErrorResponse, WalletError};
use crate::protocol::{
    BackgroundResponse, ContentScriptTask, Envelope, MessageSource, Method, PageBus, RuntimeMessage, RuntimePort,
    WindowMessage, CONTENT_SCRIPT_TARGET,
};
use crate::storage::local::{
    ACCOUNTS_KEY, CUSTOM_NETWORKS_KEY, LAST_SELECTED_NETWORK_INDEX_KEY, WEBSITES_DATA_KEY,
};
use crate::storage::session::PASSWORD_KEY;
use crate::storage::{KeyValueStore, StorageArea, StorageChange};

const DISALLOWED_SUFFIXES: [&str; 2] = [".xml", ".pdf"];

// =============================================================================
// Injection
// =============================================================================

/// What the content script knows about the document it was loaded into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDocument {
    pub url: Url,
    pub content_type: String,
    pub is_top_frame: bool,
    pub has_head: bool,
}

impl PageDocument {
    pub fn is_injectable(&self) -> bool {
        let path = self.url.path().to_ascii_lowercase();
        matches!(self.url.scheme(), "http" | "https")
            && self.is_top_frame
            && self.content_type.eq_ignore_ascii_case("text/html")
            && !DISALLOWED_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
    }

    /// The page origin as the browser reports it.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }
}

/// Where the in-page script tag goes: first child of this element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionPoint {
    Head,
    DocumentElement,
}

// =============================================================================
// Bridge
// =============================================================================

pub struct ContentScriptBridge {
    page: PageBus,
    runtime: RuntimePort,
    connector: Arc<dyn RpcConnector>,
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    injected: AtomicBool,
}

impl ContentScriptBridge {
    pub fn new(
        page: PageBus,
        runtime: RuntimePort,
        connector: Arc<dyn RpcConnector>,
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            page,
            runtime,
            connector,
            local,
            session,
            injected: AtomicBool::new(false),
        }
    }

    /// Decide where to inject the in-page script. `None` when the document
    /// is filtered out or the script is already in.
    pub fn prepare_injection(&self, document: &PageDocument) -> Option<InjectionPoint> {
        if !document.is_injectable() {
            debug!(url = %document.url, "Document not eligible for injection");
            return None;
        }
        if self.injected.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(if document.has_head {
            InjectionPoint::Head
        } else {
            InjectionPoint::DocumentElement
        })
    }

    /// Subscribe to the page and both storage areas, then serve until
    /// shutdown. Subscriptions are in place when this returns.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut window = self.page.subscribe();
        let mut local = self.local.subscribe();
        let mut session = self.session.subscribe();

        tokio::spawn(async move {
            info!(origin = %self.page.origin(), "Content script bridge starting");
            loop {
                tokio::select! {
                    message = window.recv() => match message {
                        Ok(message) => self.on_window_message(message),
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "Page messages dropped"),
                        Err(RecvError::Closed) => return,
                    },
                    change = local.recv() => self.on_storage_event(change),
                    change = session.recv() => self.on_storage_event(change),
                    _ = shutdown.cancelled() => {
                        info!("Content script bridge shutting down");
                        return;
                    }
                }
            }
        })
    }

    fn on_window_message(self: &Arc<Self>, message: WindowMessage) {
        if message.source != MessageSource::SameWindow {
            return;
        }
        let Some(envelope) = message.envelope() else {
            return;
        };
        if envelope.target != CONTENT_SCRIPT_TARGET {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let reply = this.relay(envelope).await;
            this.page.post_envelope(&reply);
        });
    }

    /// Forward one page request and build its single reply.
    pub async fn relay(&self, envelope: Envelope) -> Envelope {
        debug!(method = %envelope.method, id = %envelope.id, "Relaying page request");
        let message = RuntimeMessage {
            data: envelope.clone(),
            origin: self.page.origin().to_string(),
        };
        let response = match self.runtime.send(message).await {
            Ok(BackgroundResponse::Data(value)) => value,
            Ok(BackgroundResponse::Error(error)) => error_value(error),
            Ok(BackgroundResponse::ContentScript(task)) => match self.execute(task).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(method = %envelope.method, error = %e, "Signing failed");
                    error_value(ErrorResponse::from(&e))
                }
            },
            Err(e) => {
                warn!(method = %envelope.method, error = %e, "Background unreachable");
                error_value(ErrorResponse::from(&e))
            }
        };
        envelope.reply(response)
    }

    /// Run approved signing work against the task's network.
    pub async fn execute(&self, task: ContentScriptTask) -> Result<Value, WalletError> {
        match task {
            ContentScriptTask::SignTransaction(data) => {
                let engine = self.engine(&data.network.node_url)?;
                let mut signed = engine
                    .sign_transactions(&data.accounts, &data.transactions_options)
                    .await?;
                if signed.is_empty() {
                    return Err(WalletError::InvalidMessage("no transaction to sign".into()));
                }
                to_value(&signed.swap_remove(0))
            }
            ContentScriptTask::SignTransactions(data) => {
                let engine = self.engine(&data.network.node_url)?;
                let signed = engine
                    .sign_transactions(&data.accounts, &data.transactions_options)
                    .await?;
                to_value(&signed)
            }
            ContentScriptTask::SignIn(data) => {
                let engine = self.engine(&data.network.node_url)?;
                let hashes = engine.sign_in(&data.accounts, &data.params).await?;
                to_value(&hashes)
            }
            ContentScriptTask::SignOut(data) => {
                let engine = self.engine(&data.network.node_url)?;
                let hashes = engine.sign_out(&data.accounts, &data.params).await?;
                to_value(&hashes)
            }
        }
    }

    fn engine(&self, node_url: &str) -> Result<SigningEngine, WalletError> {
        Ok(SigningEngine::new(self.connector.connect(node_url)?))
    }

    // =========================================================================
    // Storage notifications
    // =========================================================================

    fn on_storage_event(&self, change: Result<StorageChange, RecvError>) {
        match change {
            Ok(change) => {
                if let Some(method) = self.notification_for(&change) {
                    debug!(key = %change.key, method = %method, "Notifying page of storage change");
                    self.page.post_envelope(&Envelope::notification(method));
                }
            }
            // Missed changes might have mattered; refresh everything.
            Err(RecvError::Lagged(_)) => {
                self.page
                    .post_envelope(&Envelope::notification(Method::ShouldUpdateNetwork));
                self.page
                    .post_envelope(&Envelope::notification(Method::ShouldUpdateConnectedAccounts));
            }
            Err(RecvError::Closed) => {}
        }
    }

    /// Page notification a storage change calls for, if any.
    pub fn notification_for(&self, change: &StorageChange) -> Option<Method> {
        match (change.area, change.key.as_str()) {
            (StorageArea::Local, LAST_SELECTED_NETWORK_INDEX_KEY | CUSTOM_NETWORKS_KEY) => {
                Some(Method::ShouldUpdateNetwork)
            }
            (StorageArea::Local, ACCOUNTS_KEY) | (StorageArea::Session, PASSWORD_KEY) => {
                Some(Method::ShouldUpdateConnectedAccounts)
            }
            (StorageArea::Local, WEBSITES_DATA_KEY) => {
                let origin = self.page.origin().to_lowercase();
                let grant = |value: &Option<Value>| value.as_ref().and_then(|v| v.get(&origin)).cloned();
                (grant(&change.old_value) != grant(&change.new_value))
                    .then_some(Method::ShouldUpdateConnectedAccounts)
            }
            _ => None,
        }
    }
}

fn error_value(error: ErrorResponse) -> Value {
    serde_json::to_value(error).unwrap_or(Value::Null)
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, WalletError> {
    serde_json::to_value(value).map_err(|e| WalletError::InvalidMessage(format!("failed to encode result: {e}")))
}
