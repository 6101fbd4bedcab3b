// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Headless Host
//!
//! Runs the whole extension for one page origin and speaks newline-delimited
//! JSON on stdin/stdout, so a dApp test suite can drive the wallet without a
//! browser.
//!
//! ## Input (one command per line)
//!
//! | `command` | Fields | Effect |
//! |-----------|--------|--------|
//! | `page` | `message` | Posted on the page as `window.postMessage` |
//! | `popup` | `windowId`, `action`, `accounts?` | Confirm or cancel an open popup |
//! | `setup` | `password`, `accounts` | Create the wallet and import keys |
//! | `unlock` | `password` | Unlock the session |
//! | `lock` | | Forget the session password |
//!
//! ## Output (one event per line)
//!
//! | `event` | Fields |
//! |---------|--------|
//! | `ready` | `origin` |
//! | `page` | `message` (everything posted to the page by the wallet) |
//! | `popupOpened` | `windowId`, `url` |
//! | `popupClosed` | `windowId` |
//! | `error` | `message` |

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::blockchain::{HttpRpcConnector, SecretKey};
use crate::browser::{HeadlessWindows, OpenedPopup, WindowId, WindowManager};
use crate::config::WalletConfig;
use crate::content_script::PageDocument;
use crate::error::WalletError;
use crate::popup::PopupPage;
use crate::protocol::{MessageSource, PageBus, CONTENT_SCRIPT_TARGET};
use crate::runtime::{ExtensionRuntime, PageSession};
use crate::state::WalletState;
use crate::storage::{MemoryStore, RedbStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("Failed to open the local store: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedAccount {
    pub account_id: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopupAction {
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum HostCommand {
    Page {
        message: Value,
    },
    #[serde(rename_all = "camelCase")]
    Popup {
        window_id: WindowId,
        action: PopupAction,
        /// Connect popups only: account ids to grant instead of the preselection.
        #[serde(default)]
        accounts: Option<Vec<String>>,
    },
    Setup {
        password: String,
        #[serde(default)]
        accounts: Vec<ImportedAccount>,
    },
    Unlock {
        password: String,
    },
    Lock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    Ready {
        origin: String,
    },
    Page {
        message: Value,
    },
    #[serde(rename_all = "camelCase")]
    PopupOpened {
        window_id: WindowId,
        url: String,
    },
    #[serde(rename_all = "camelCase")]
    PopupClosed {
        window_id: WindowId,
    },
    Error {
        message: String,
    },
}

/// Messages the wallet posts to the page. Page requests are echoed on the
/// bus too and stay out of the output.
fn is_page_bound(data: &Value) -> bool {
    data.get("target").and_then(Value::as_str) != Some(CONTENT_SCRIPT_TARGET)
}

// =============================================================================
// Host
// =============================================================================

pub struct Host {
    runtime: ExtensionRuntime,
    page: PageSession,
    popups: Mutex<HashMap<WindowId, OpenedPopup>>,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl Host {
    /// Attach to `origin` and start forwarding page and popup traffic to
    /// `events`.
    pub fn attach(
        runtime: ExtensionRuntime,
        origin: &str,
        events: mpsc::UnboundedSender<HostEvent>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, WalletError> {
        let url = Url::parse(origin).map_err(|e| WalletError::InvalidMessage(format!("page origin {origin}: {e}")))?;
        let document = PageDocument {
            url,
            content_type: "text/html".to_string(),
            is_top_frame: true,
            has_head: true,
        };
        let page = runtime
            .open_page(&document)
            .ok_or_else(|| WalletError::InvalidMessage(format!("{origin} cannot host the wallet")))?;

        let host = Arc::new(Self {
            runtime,
            page,
            popups: Mutex::new(HashMap::new()),
            events,
        });
        host.spawn_forwarders(shutdown);
        host.emit(HostEvent::Ready {
            origin: host.page.bus.origin().to_string(),
        });
        Ok(host)
    }

    pub fn page_bus(&self) -> &PageBus {
        &self.page.bus
    }

    fn emit(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            debug!("Host output closed");
        }
    }

    fn spawn_forwarders(self: &Arc<Self>, shutdown: CancellationToken) {
        let mut page = self.page.bus.subscribe();
        let mut opened = self.runtime.windows().subscribe_opened();
        let mut removed = self.runtime.windows().subscribe_removed();
        let host = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok(message) = page.recv() => {
                        if message.source == MessageSource::SameWindow && is_page_bound(&message.data) {
                            host.emit(HostEvent::Page { message: message.data });
                        }
                    }
                    Ok(popup) = opened.recv() => {
                        let (window_id, url) = (popup.id, popup.spec.url.to_string());
                        if let Ok(mut popups) = host.popups.lock() {
                            popups.insert(popup.id, popup);
                        }
                        host.emit(HostEvent::PopupOpened { window_id, url });
                    }
                    Ok(window_id) = removed.recv() => {
                        if let Ok(mut popups) = host.popups.lock() {
                            popups.remove(&window_id);
                        }
                        host.emit(HostEvent::PopupClosed { window_id });
                    }
                    _ = shutdown.cancelled() => return,
                }
            }
        });
    }

    /// Apply one command. Popup decisions run in the background so the
    /// close delay does not hold up the input.
    pub async fn handle(self: &Arc<Self>, command: HostCommand) -> Result<(), WalletError> {
        let state = self.runtime.state();
        match command {
            HostCommand::Page { message } => self.page.bus.post_message(message),
            HostCommand::Popup {
                window_id,
                action,
                accounts,
            } => {
                let opened = self
                    .popups
                    .lock()
                    .ok()
                    .and_then(|popups| popups.get(&window_id).cloned())
                    .ok_or_else(|| WalletError::Popup(format!("no open popup with window id {window_id}")))?;
                let page = self.runtime.load_popup(&opened)?;
                let host = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = decide(page, action, accounts).await {
                        warn!(window_id, error = %e, "Popup decision failed");
                        host.emit(HostEvent::Error { message: e.to_string() });
                    }
                });
            }
            HostCommand::Setup { password, accounts } => {
                state.create_wallet(&password)?;
                for account in accounts {
                    let key: SecretKey = account.private_key.parse()?;
                    state.import_account(&account.account_id, &key)?;
                }
            }
            HostCommand::Unlock { password } => state.unlock(&password)?,
            HostCommand::Lock => state.lock()?,
        }
        Ok(())
    }
}

async fn decide(page: PopupPage, action: PopupAction, accounts: Option<Vec<String>>) -> Result<(), WalletError> {
    match (action, page) {
        (PopupAction::Cancel, page) => page.cancel().await,
        (PopupAction::Confirm, PopupPage::ConnectAccounts(mut popup)) => {
            if let Some(ids) = accounts {
                popup.select_only(&ids)?;
            }
            popup.confirm().await.map(|_| ())
        }
        (PopupAction::Confirm, page) => page.confirm().await,
    }
}

// =============================================================================
// Process entry
// =============================================================================

/// Serve stdin until EOF or `shutdown`.
pub async fn run(config: WalletConfig, shutdown: CancellationToken) -> Result<(), HostError> {
    let local = RedbStore::open(&config.local_store_path())?;
    let state = WalletState::new(Arc::new(local), Arc::new(MemoryStore::session()));
    let runtime = ExtensionRuntime::start(
        &config,
        state,
        Arc::new(HeadlessWindows::default()),
        Arc::new(HttpRpcConnector::new(config.rpc_timeout)),
        shutdown.clone(),
    );

    let (events, mut outbox) = mpsc::unbounded_channel();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = outbox.recv().await {
            let Ok(mut line) = serde_json::to_vec(&event) else {
                continue;
            };
            line.push(b'\n');
            if stdout.write_all(&line).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let host = Host::attach(runtime, &config.page_origin, events.clone(), shutdown.clone())?;
    info!(origin = %config.page_origin, store = %config.local_store_path().display(), "Host ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let result = match serde_json::from_str::<HostCommand>(&line) {
                    Ok(command) => host.handle(command).await,
                    Err(e) => Err(WalletError::InvalidMessage(e.to_string())),
                };
                if let Err(e) = result {
                    warn!(error = %e, "Command failed");
                    host.emit(HostEvent::Error { message: e.public_message() });
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }

    shutdown.cancel();
    drop(host);
    drop(events);
    let _ = writer.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::signing::tests::{FakeRpc, FixedConnector};
    use crate::protocol::{Envelope, Method};
    use crate::state::tests::test_state;
    use serde_json::json;
    use std::time::Duration;

    const ORIGIN: &str = "https://app.example";

    fn host() -> (Arc<Host>, mpsc::UnboundedReceiver<HostEvent>) {
        let config = WalletConfig {
            popup_close_delay: Duration::ZERO,
            ..WalletConfig::default()
        };
        let shutdown = CancellationToken::new();
        let runtime = ExtensionRuntime::start(
            &config,
            test_state(),
            Arc::new(HeadlessWindows::default()),
            Arc::new(FixedConnector(Arc::new(FakeRpc::default()))),
            shutdown.clone(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        (Host::attach(runtime, ORIGIN, tx, shutdown).unwrap(), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> HostEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap()
    }

    #[test]
    fn commands_parse_from_lines() {
        let popup: HostCommand =
            serde_json::from_str(r#"{"command":"popup","windowId":3,"action":"confirm","accounts":["alice.testnet"]}"#)
                .unwrap();
        assert_eq!(
            popup,
            HostCommand::Popup {
                window_id: 3,
                action: PopupAction::Confirm,
                accounts: Some(vec!["alice.testnet".into()]),
            }
        );
        let lock: HostCommand = serde_json::from_str(r#"{"command":"lock"}"#).unwrap();
        assert_eq!(lock, HostCommand::Lock);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let event = serde_json::to_value(HostEvent::PopupClosed { window_id: 2 }).unwrap();
        assert_eq!(event, json!({"event": "popupClosed", "windowId": 2}));
    }

    #[tokio::test]
    async fn replies_reach_the_output_but_requests_do_not() {
        let (host, mut rx) = host();
        assert_eq!(next(&mut rx).await, HostEvent::Ready { origin: ORIGIN.into() });

        let request = Envelope::request(Method::GetNetwork, None);
        host.handle(HostCommand::Page {
            message: serde_json::to_value(&request).unwrap(),
        })
        .await
        .unwrap();

        let HostEvent::Page { message } = next(&mut rx).await else {
            panic!("expected a page event");
        };
        let reply: Envelope = serde_json::from_value(message).unwrap();
        assert_eq!(reply.id, request.id);
        assert_eq!(reply.response.unwrap()["networkId"], "testnet");
    }

    #[tokio::test]
    async fn setup_then_lock_and_unlock() {
        let (host, _rx) = host();
        let key = SecretKey::from_seed([4u8; 32]).unwrap();
        host.handle(HostCommand::Setup {
            password: "hunter22".into(),
            accounts: vec![ImportedAccount {
                account_id: "alice.testnet".into(),
                private_key: key.to_string(),
            }],
        })
        .await
        .unwrap();
        let state = host.runtime.state();
        assert_eq!(state.accounts().unwrap().unwrap().len(), 1);

        host.handle(HostCommand::Lock).await.unwrap();
        assert!(!state.is_unlocked().unwrap());
        assert!(host
            .handle(HostCommand::Unlock {
                password: "wrong".into()
            })
            .await
            .is_err());
        host.handle(HostCommand::Unlock {
            password: "hunter22".into(),
        })
        .await
        .unwrap();
        assert!(state.is_unlocked().unwrap());
    }

    #[tokio::test]
    async fn unknown_popup_is_an_error() {
        let (host, _rx) = host();
        let err = host
            .handle(HostCommand::Popup {
                window_id: 99,
                action: PopupAction::Cancel,
                accounts: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Popup(_)));
    }
}
