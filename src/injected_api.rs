// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Injected Wallet API
//!
//! The object a dApp talks to. Requests go out as envelopes on the page bus
//! and are matched back to their caller by id; each id resolves at most once.
//!
//! The API keeps a cached view of the network and the connected accounts,
//! refreshed on start and whenever the content script says something
//! changed. Listeners only hear about values that actually changed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blockchain::{is_supported_network, SignedTransaction, TransactionIntent};
use crate::error::{ErrorCode, ErrorResponse, WalletError};
use crate::models::{ConnectParams, ConnectedAccount, NetworkInfo, SignInParams, SignOutParams};
use crate::protocol::{Envelope, MessageSource, Method, PageBus, INITIALIZED_EVENT, INJECTED_API_TARGET};

/// Wallet id announced to dApps.
pub const WALLET_ID: &str = "daoWallet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AccountsChanged,
    NetworkChanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    AccountsChanged { accounts: Vec<ConnectedAccount> },
    NetworkChanged { network: NetworkInfo },
}

impl WalletEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AccountsChanged { .. } => EventKind::AccountsChanged,
            Self::NetworkChanged { .. } => EventKind::NetworkChanged,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&WalletEvent) + Send + Sync>;

struct Listener {
    signature: String,
    callback: EventCallback,
}

struct Snapshot {
    network: NetworkInfo,
    accounts: Vec<ConnectedAccount>,
}

/// Removes the subscription it was returned for.
pub struct Unsubscribe {
    api: Weak<InjectedApi>,
    event: EventKind,
    signature: String,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        if let Some(api) = self.api.upgrade() {
            api.off(self.event, Some(&self.signature));
        }
    }
}

pub struct InjectedApi {
    page: PageBus,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    snapshot: Mutex<Snapshot>,
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
    initialized: watch::Sender<bool>,
}

impl InjectedApi {
    /// Attach to a page and start the first refresh. The response listener
    /// is subscribed before anything is posted.
    pub fn start(page: PageBus, shutdown: CancellationToken) -> Arc<Self> {
        let (initialized, _) = watch::channel(false);
        let api = Arc::new(Self {
            page,
            pending: Mutex::new(HashMap::new()),
            snapshot: Mutex::new(Snapshot {
                network: NetworkInfo::uninitialized(),
                accounts: Vec::new(),
            }),
            listeners: Mutex::new(HashMap::new()),
            initialized,
        });

        let mut messages = api.page.subscribe();
        let dispatcher = Arc::downgrade(&api);
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    message = messages.recv() => message,
                    _ = shutdown.cancelled() => break,
                };
                let Some(api) = dispatcher.upgrade() else {
                    break;
                };
                match message {
                    Ok(message) if message.source == MessageSource::SameWindow => {
                        if let Some(envelope) = message.envelope() {
                            api.dispatch(envelope);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Injected API missed page messages"),
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Injected API dispatcher stopped");
        });

        let init = Arc::clone(&api);
        tokio::spawn(async move {
            let result = async {
                init.refresh_network().await?;
                init.refresh_accounts().await
            }
            .await;
            match result {
                Ok(()) => {
                    init.initialized.send_replace(true);
                    init.page.post_message(json!(INITIALIZED_EVENT));
                    info!("Injected API initialized");
                }
                Err(e) => warn!(error = %e, "Injected API initialization failed"),
            }
        });

        api
    }

    // =========================================================================
    // Read-only state
    // =========================================================================

    pub fn id(&self) -> &'static str {
        WALLET_ID
    }

    pub fn network(&self) -> NetworkInfo {
        self.snapshot
            .lock()
            .map(|s| s.network.clone())
            .unwrap_or_else(|_| NetworkInfo::uninitialized())
    }

    pub fn accounts(&self) -> Vec<ConnectedAccount> {
        self.snapshot.lock().map(|s| s.accounts.clone()).unwrap_or_default()
    }

    pub fn connected(&self) -> bool {
        !self.accounts().is_empty()
    }

    pub fn initialized(&self) -> bool {
        *self.initialized.borrow()
    }

    /// Resolve once the first refresh finished.
    pub async fn wait_initialized(&self) {
        let mut rx = self.initialized.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn supports_network(&self, network_id: &str) -> bool {
        is_supported_network(network_id)
    }

    // =========================================================================
    // Wallet operations
    // =========================================================================

    pub async fn connect(&self, params: ConnectParams) -> Result<Vec<ConnectedAccount>, WalletError> {
        if let Some(network_id) = params.network_id.as_deref() {
            if network_id == self.network().network_id {
                return Ok(self.accounts());
            }
            if !self.supports_network(network_id) {
                return Err(WalletError::UnsupportedNetwork(network_id.to_string()));
            }
        }
        let accounts: Vec<ConnectedAccount> = self.request(Method::Connect, Some(&params)).await?;
        self.apply_accounts(accounts.clone());
        Ok(accounts)
    }

    pub async fn disconnect(&self) -> Result<(), WalletError> {
        let _: Value = self.request(Method::Disconnect, None::<&()>).await?;
        self.apply_accounts(Vec::new());
        Ok(())
    }

    pub async fn sign_transaction(&self, transaction: TransactionIntent) -> Result<SignedTransaction, WalletError> {
        self.request(Method::SignTransaction, Some(&json!({ "transaction": transaction })))
            .await
    }

    pub async fn sign_transactions(
        &self,
        transactions: Vec<TransactionIntent>,
    ) -> Result<Vec<SignedTransaction>, WalletError> {
        self.request(Method::SignTransactions, Some(&json!({ "transactions": transactions })))
            .await
    }

    pub async fn sign_in(&self, params: SignInParams) -> Result<(), WalletError> {
        let _: Value = self.request(Method::SignIn, Some(&params)).await?;
        Ok(())
    }

    pub async fn sign_out(&self, params: SignOutParams) -> Result<(), WalletError> {
        let _: Value = self.request(Method::SignOut, Some(&params)).await?;
        Ok(())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Register a listener. `signature` identifies it for [`Self::off`];
    /// registering the same signature twice collapses on removal.
    pub fn on(
        self: &Arc<Self>,
        event: EventKind,
        signature: impl Into<String>,
        callback: impl Fn(&WalletEvent) + Send + Sync + 'static,
    ) -> Unsubscribe {
        let signature = signature.into();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.entry(event).or_default().push(Listener {
                signature: signature.clone(),
                callback: Arc::new(callback),
            });
        }
        Unsubscribe {
            api: Arc::downgrade(self),
            event,
            signature,
        }
    }

    /// Remove every listener with this signature, or all of them for `None`.
    pub fn off(&self, event: EventKind, signature: Option<&str>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            match signature {
                Some(signature) => {
                    if let Some(list) = listeners.get_mut(&event) {
                        list.retain(|l| l.signature != signature);
                    }
                }
                None => {
                    listeners.remove(&event);
                }
            }
        }
    }

    fn emit(&self, event: WalletEvent) {
        let callbacks: Vec<EventCallback> = self
            .listeners
            .lock()
            .map(|listeners| {
                listeners
                    .get(&event.kind())
                    .map(|list| list.iter().map(|l| Arc::clone(&l.callback)).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        for callback in callbacks {
            callback(&event);
        }
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    pub async fn refresh_network(&self) -> Result<(), WalletError> {
        let network: NetworkInfo = self.request(Method::GetNetwork, None::<&()>).await?;
        self.apply_network(network);
        Ok(())
    }

    pub async fn refresh_accounts(&self) -> Result<(), WalletError> {
        let accounts: Vec<ConnectedAccount> = self.request(Method::GetConnectedAccounts, None::<&()>).await?;
        self.apply_accounts(accounts);
        Ok(())
    }

    fn apply_network(&self, network: NetworkInfo) {
        let changed = match self.snapshot.lock() {
            Ok(mut snapshot) if snapshot.network != network => {
                snapshot.network = network.clone();
                true
            }
            _ => false,
        };
        if changed {
            debug!(network_id = %network.network_id, "Network changed");
            self.emit(WalletEvent::NetworkChanged { network });
        }
    }

    fn apply_accounts(&self, accounts: Vec<ConnectedAccount>) {
        let changed = match self.snapshot.lock() {
            Ok(mut snapshot) if snapshot.accounts != accounts => {
                snapshot.accounts = accounts.clone();
                true
            }
            _ => false,
        };
        if changed {
            debug!(count = accounts.len(), "Connected accounts changed");
            self.emit(WalletEvent::AccountsChanged { accounts });
        }
    }

    // =========================================================================
    // Correlation
    // =========================================================================

    fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        if envelope.target != INJECTED_API_TARGET {
            return;
        }
        let waiter = self.pending.lock().ok().and_then(|mut pending| pending.remove(&envelope.id));
        if let Some(waiter) = waiter {
            let _ = waiter.send(envelope.response.unwrap_or(Value::Null));
            return;
        }

        // Refreshes wait on replies this dispatcher delivers, so they run on
        // their own tasks.
        let api = Arc::clone(self);
        match envelope.parsed_method() {
            Ok(Method::ShouldUpdateNetwork) => {
                tokio::spawn(async move {
                    if let Err(e) = api.refresh_network().await {
                        warn!(error = %e, "Network refresh failed");
                    }
                });
            }
            Ok(Method::ShouldUpdateConnectedAccounts) => {
                tokio::spawn(async move {
                    if let Err(e) = api.refresh_accounts().await {
                        warn!(error = %e, "Accounts refresh failed");
                    }
                });
            }
            _ => debug!(id = %envelope.id, "Dropping unmatched reply"),
        }
    }

    async fn request<P: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        params: Option<&P>,
    ) -> Result<T, WalletError> {
        let params = params
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| WalletError::InvalidMessage(format!("bad params for {method}: {e}")))?;
        let envelope = Envelope::request(method, params);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| WalletError::Transport("pending table poisoned".into()))?
            .insert(envelope.id.clone(), tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            id: &envelope.id,
        };
        self.page.post_envelope(&envelope);

        let response = rx
            .await
            .map_err(|_| WalletError::Transport("injected API stopped".into()))?;
        if let Some(error) = response_error(&response) {
            return Err(error);
        }
        serde_json::from_value(response)
            .map_err(|e| WalletError::InvalidMessage(format!("bad response for {method}: {e}")))
    }
}

/// Frees a request's correlation slot however the request ends, including
/// when the caller drops the future before a reply arrives.
struct PendingSlot<'a> {
    pending: &'a Mutex<HashMap<String, oneshot::Sender<Value>>>,
    id: &'a str,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(self.id);
        }
    }
}

/// Error carried in a response body, if any.
fn response_error(response: &Value) -> Option<WalletError> {
    let message = response.get("error")?.as_str()?;
    Some(match serde_json::from_value::<ErrorResponse>(response.clone()) {
        Ok(body) => body.into(),
        Err(_) => WalletError::Remote {
            code: ErrorCode::Internal,
            message: message.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CONTENT_SCRIPT_TARGET;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ORIGIN: &str = "https://app.example";

    fn testnet() -> NetworkInfo {
        NetworkInfo {
            network_id: "testnet".into(),
            node_url: "https://rpc.testnet.near.org".into(),
        }
    }

    fn alice() -> ConnectedAccount {
        ConnectedAccount {
            account_id: "alice.testnet".into(),
            public_key: "ed25519:11111111111111111111111111111111".into(),
        }
    }

    /// Answers page requests the way a content script would.
    fn fake_wallet(page: PageBus, answer: impl Fn(&Envelope) -> Option<Value> + Send + 'static) {
        let mut rx = page.subscribe();
        tokio::spawn(async move {
            while let Ok(message) = rx.recv().await {
                let Some(envelope) = message.envelope() else { continue };
                if envelope.target != CONTENT_SCRIPT_TARGET {
                    continue;
                }
                if let Some(response) = answer(&envelope) {
                    page.post_envelope(&envelope.reply(response));
                }
            }
        });
    }

    fn standard_answers(envelope: &Envelope) -> Option<Value> {
        match envelope.parsed_method().ok()? {
            Method::GetNetwork => Some(serde_json::to_value(testnet()).unwrap()),
            Method::GetConnectedAccounts => Some(json!([alice()])),
            Method::Disconnect => Some(json!([])),
            _ => None,
        }
    }

    #[tokio::test]
    async fn initializes_from_network_then_accounts() {
        let page = PageBus::new(ORIGIN);
        fake_wallet(page.clone(), standard_answers);
        let api = InjectedApi::start(page, CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(1), api.wait_initialized()).await.unwrap();
        assert!(api.initialized());
        assert_eq!(api.network(), testnet());
        assert_eq!(api.accounts(), vec![alice()]);
        assert!(api.connected());
        assert_eq!(api.id(), "daoWallet");
    }

    #[tokio::test]
    async fn duplicate_replies_resolve_once() {
        let page = PageBus::new(ORIGIN);
        let bus = page.clone();
        fake_wallet(page.clone(), move |envelope| {
            let response = standard_answers(envelope)?;
            // Answer twice; the second copy must be dropped.
            bus.post_envelope(&envelope.reply(response.clone()));
            Some(response)
        });
        let api = InjectedApi::start(page, CancellationToken::new());
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = changes.clone();
        let _sub = api.on(EventKind::AccountsChanged, "counter", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::timeout(Duration::from_secs(1), api.wait_initialized()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert!(api.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn connect_short_circuits_on_network() {
        let page = PageBus::new(ORIGIN);
        fake_wallet(page.clone(), standard_answers);
        let api = InjectedApi::start(page, CancellationToken::new());
        api.wait_initialized().await;

        let same = api
            .connect(ConnectParams {
                network_id: Some("testnet".into()),
            })
            .await
            .unwrap();
        assert_eq!(same, vec![alice()]);

        let err = api
            .connect(ConnectParams {
                network_id: Some("betanet".into()),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Network betanet is not supported");
    }

    #[tokio::test]
    async fn error_replies_reject_with_their_code() {
        let page = PageBus::new(ORIGIN);
        fake_wallet(page.clone(), |envelope| match envelope.parsed_method().ok()? {
            Method::SignTransaction => Some(json!({"error": "User rejected request", "errorCode": "user_rejected"})),
            Method::SignOut => Some(json!({"error": "something broke"})),
            other => standard_answers(&Envelope::request(other, None)),
        });
        let api = InjectedApi::start(page, CancellationToken::new());
        api.wait_initialized().await;

        let err = api
            .sign_transaction(TransactionIntent::new("alice.testnet", "bob.testnet", []))
            .await
            .unwrap_err();
        assert!(err.is_user_rejection());

        let err = api.sign_out(SignOutParams { accounts: vec![] }).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(err.to_string(), "something broke");
    }

    #[tokio::test]
    async fn off_removes_all_listeners_with_the_signature() {
        let page = PageBus::new(ORIGIN);
        fake_wallet(page.clone(), standard_answers);
        let api = InjectedApi::start(page, CancellationToken::new());
        api.wait_initialized().await;

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            api.on(EventKind::AccountsChanged, "same", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        let kept = calls.clone();
        let other = api.on(EventKind::AccountsChanged, "other", move |_| {
            kept.fetch_add(100, Ordering::SeqCst);
        });
        api.off(EventKind::AccountsChanged, Some("same"));

        api.disconnect().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 100);
        assert!(!api.connected());

        // Unchanged value: no event.
        other.unsubscribe();
        api.disconnect().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn notifications_trigger_refresh_and_events() {
        let page = PageBus::new(ORIGIN);
        let network = Arc::new(Mutex::new(testnet()));
        let served = network.clone();
        fake_wallet(page.clone(), move |envelope| match envelope.parsed_method().ok()? {
            Method::GetNetwork => Some(serde_json::to_value(served.lock().unwrap().clone()).unwrap()),
            _ => standard_answers(envelope),
        });
        let api = InjectedApi::start(page.clone(), CancellationToken::new());
        api.wait_initialized().await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        api.on(EventKind::NetworkChanged, "watch", move |event| {
            let _ = tx.send(event.clone());
        });

        network.lock().unwrap().network_id = "mainnet".into();
        page.post_envelope(&Envelope::notification(Method::ShouldUpdateNetwork));

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, WalletEvent::NetworkChanged { network } if network.network_id == "mainnet"));
    }

    #[tokio::test]
    async fn abandoned_request_frees_its_slot() {
        let page = PageBus::new(ORIGIN);
        fake_wallet(page.clone(), standard_answers);
        let api = InjectedApi::start(page, CancellationToken::new());
        api.wait_initialized().await;

        // Nobody answers sign-out, so the caller gives up.
        let params = SignOutParams { accounts: vec![] };
        let gave_up = tokio::time::timeout(Duration::from_millis(20), api.sign_out(params)).await;
        assert!(gave_up.is_err());
        assert!(api.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn frame_messages_cannot_answer_requests() {
        let page = PageBus::new(ORIGIN);
        let bus = page.clone();
        let mut rx = page.subscribe();
        let api = InjectedApi::start(page, CancellationToken::new());

        // The first request is get-network; answer it from a frame only.
        let request = loop {
            let message = rx.recv().await.unwrap();
            if let Some(env) = message.envelope() {
                break env;
            }
        };
        let reply = request.reply(serde_json::to_value(testnet()).unwrap());
        bus.post_from_frame("https://evil.example", serde_json::to_value(&reply).unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!api.initialized());
        assert_eq!(api.pending.lock().unwrap().len(), 1);
    }
}
