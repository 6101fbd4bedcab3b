// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Background Coordinator
//!
//! Receives page requests relayed by content scripts, gates everything that
//! touches keys behind a popup approval and hands approved work back to the
//! content script.
//!
//! ## Request lifecycle
//!
//! | Phase | What happens |
//! |-------|--------------|
//! | `received` | Precondition checks. Failures answer immediately, no popup. |
//! | `awaiting_approval` | Pending record persisted, popup opened, waiting for its window to close. |
//! | `resolved` | Record taken. Anything but an explicit approval is a rejection. |
//!
//! Every request runs on its own task with its own record and popup, so a
//! slow approval never blocks `get-network` or another site's request.

pub mod popup;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blockchain::{is_supported_network, TransactionIntent};
use crate::error::WalletError;
use crate::models::{AccountWithPrivateKey, ConnectParams, ConnectedAccount, Network, SignInParams, SignOutParams};
use crate::popup::PopupRequest;
use crate::protocol::{
    BackgroundResponse, ContentScriptTask, Envelope, Method, RuntimeMessage, RuntimeRequest, SignInData,
    SignOutData, SignTransactionsData,
};
use crate::state::WalletState;
use crate::storage::{OperationPayload, OperationType, PendingApproval};

pub use popup::{OpenPopup, PopupLauncher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPhase {
    Received,
    AwaitingApproval,
    Resolved,
}

impl RequestPhase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignTransactionParams {
    transaction: TransactionIntent,
}

#[derive(Debug, Deserialize)]
struct SignTransactionsParams {
    transactions: Vec<TransactionIntent>,
}

pub struct BackgroundCoordinator {
    state: WalletState,
    popups: PopupLauncher,
}

impl BackgroundCoordinator {
    pub fn new(state: WalletState, popups: PopupLauncher) -> Self {
        Self { state, popups }
    }

    pub fn popups(&self) -> &PopupLauncher {
        &self.popups
    }

    /// Serve the mailbox until shutdown or until every sender is gone.
    ///
    /// ```rust,ignore
    /// tokio::spawn(coordinator.run(mailbox, shutdown.clone()));
    /// ```
    pub async fn run(self: Arc<Self>, mut mailbox: mpsc::Receiver<RuntimeRequest>, shutdown: CancellationToken) {
        info!("Background coordinator starting");
        loop {
            tokio::select! {
                request = mailbox.recv() => {
                    let Some(RuntimeRequest { message, reply }) = request else {
                        info!("Background mailbox closed");
                        return;
                    };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let response = this.handle(message).await;
                        if reply.send(response).is_err() {
                            debug!("Content script went away before the response");
                        }
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("Background coordinator shutting down");
                    return;
                }
            }
        }
    }

    /// Answer one message. Never panics and never stays silent: failures
    /// become error responses.
    pub async fn handle(&self, message: RuntimeMessage) -> BackgroundResponse {
        let RuntimeMessage { data, origin } = message;
        debug!(method = %data.method, origin = %origin, id = %data.id, "Background message");

        let result = match data.parsed_method() {
            Ok(Method::GetNetwork) => self.get_network(),
            Ok(Method::GetConnectedAccounts) => self.get_connected_accounts(&origin),
            Ok(Method::Connect) => self.connect(&origin, &data).await,
            Ok(Method::Disconnect) => self.disconnect(&origin),
            Ok(Method::SignTransaction) => self.sign_transaction(&origin, &data).await,
            Ok(Method::SignTransactions) => self.sign_transactions(&origin, &data).await,
            Ok(Method::SignIn) => self.sign_in(&origin, &data).await,
            Ok(Method::SignOut) => self.sign_out(&origin, &data).await,
            Ok(notification @ (Method::ShouldUpdateNetwork | Method::ShouldUpdateConnectedAccounts)) => {
                Err(WalletError::UnknownMethod(notification.to_string()))
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                if e.is_user_rejection() {
                    info!(method = %data.method, origin = %origin, "Request rejected by user");
                } else {
                    warn!(method = %data.method, origin = %origin, error = %e, "Request failed");
                }
                e.into()
            }
        }
    }

    // =========================================================================
    // Reads and grants
    // =========================================================================

    fn get_network(&self) -> Result<BackgroundResponse, WalletError> {
        data(&self.state.network_info()?)
    }

    fn get_connected_accounts(&self, origin: &str) -> Result<BackgroundResponse, WalletError> {
        data(&self.state.website_connected_accounts(origin)?)
    }

    async fn connect(&self, origin: &str, envelope: &Envelope) -> Result<BackgroundResponse, WalletError> {
        let params: ConnectParams = params_or_default(envelope)?;
        if self.state.local.accounts()?.is_empty() {
            return Err(WalletError::NoAccounts);
        }

        let request = match params.network_id {
            Some(network_id) if !is_supported_network(&network_id) => {
                return Err(WalletError::UnsupportedNetwork(network_id));
            }
            Some(network_id) => {
                let current = self.state.current_network()?;
                if current.is_some_and(|n| n.network_id == network_id) {
                    None
                } else {
                    Some(PopupRequest::ChangeNetwork {
                        website: origin.to_string(),
                        network_id,
                    })
                }
            }
            None => Some(PopupRequest::ConnectAccounts {
                website: origin.to_string(),
            }),
        };

        if let Some(request) = request {
            let popup = self.popups.open(&request).await?;
            self.popups.wait_closed(popup).await;
        }
        self.get_connected_accounts(origin)
    }

    fn disconnect(&self, origin: &str) -> Result<BackgroundResponse, WalletError> {
        if !origin.is_empty() {
            self.state.disconnect_website(origin)?;
            info!(origin = %origin, "Website disconnected");
        }
        data(&Vec::<ConnectedAccount>::new())
    }

    // =========================================================================
    // Approval-gated operations
    // =========================================================================

    async fn sign_transaction(&self, origin: &str, envelope: &Envelope) -> Result<BackgroundResponse, WalletError> {
        let params: SignTransactionParams = envelope.params_as()?;
        let intents = vec![params.transaction];
        let (network, accounts) = self.approve_transactions(origin, &intents).await?;
        Ok(BackgroundResponse::ContentScript(ContentScriptTask::SignTransaction(
            SignTransactionsData {
                network,
                accounts,
                transactions_options: intents,
            },
        )))
    }

    async fn sign_transactions(&self, origin: &str, envelope: &Envelope) -> Result<BackgroundResponse, WalletError> {
        let params: SignTransactionsParams = envelope.params_as()?;
        let intents = params.transactions;
        let (network, accounts) = self.approve_transactions(origin, &intents).await?;
        Ok(BackgroundResponse::ContentScript(ContentScriptTask::SignTransactions(
            SignTransactionsData {
                network,
                accounts,
                transactions_options: intents,
            },
        )))
    }

    async fn sign_in(&self, origin: &str, envelope: &Envelope) -> Result<BackgroundResponse, WalletError> {
        let params: SignInParams = envelope.params_as()?;
        self.check_ready()?;
        self.await_approval(
            origin,
            OperationType::SignIn,
            OperationPayload::SignIn(params.clone()),
        )
        .await?;
        let (network, stored) = self.ready_accounts()?;
        let accounts = select_accounts(&stored, params.accounts.iter().map(|a| a.account_id.as_str()), |id| {
            WalletError::AccountNotFound(id.to_string())
        })?;
        Ok(BackgroundResponse::ContentScript(ContentScriptTask::SignIn(SignInData {
            network,
            accounts,
            params,
        })))
    }

    async fn sign_out(&self, origin: &str, envelope: &Envelope) -> Result<BackgroundResponse, WalletError> {
        let params: SignOutParams = envelope.params_as()?;
        self.check_ready()?;
        self.await_approval(
            origin,
            OperationType::SignOut,
            OperationPayload::SignOut(params.clone()),
        )
        .await?;
        let (network, stored) = self.ready_accounts()?;
        let accounts = select_accounts(&stored, params.accounts.iter().map(|a| a.account_id.as_str()), |id| {
            WalletError::AccountNotFound(id.to_string())
        })?;
        Ok(BackgroundResponse::ContentScript(ContentScriptTask::SignOut(SignOutData {
            network,
            accounts,
            params,
        })))
    }

    async fn approve_transactions(
        &self,
        origin: &str,
        intents: &[TransactionIntent],
    ) -> Result<(Network, Vec<AccountWithPrivateKey>), WalletError> {
        self.check_ready()?;
        self.await_approval(
            origin,
            OperationType::SignTransactions,
            OperationPayload::Transactions(intents.to_vec()),
        )
        .await?;
        let (network, stored) = self.ready_accounts()?;
        let accounts = select_accounts(&stored, intents.iter().map(|i| i.signer_id.as_str()), |id| {
            WalletError::SignerNotFound(id.to_string())
        })?;
        Ok((network, accounts))
    }

    /// Persist the record, show the popup and read the decision back once
    /// its window is gone.
    async fn await_approval(
        &self,
        origin: &str,
        operation: OperationType,
        payload: OperationPayload,
    ) -> Result<(), WalletError> {
        let record = PendingApproval::new(operation, payload);
        let uuid = record.uuid;
        self.state.session.add_pending(&record)?;
        log_phase(RequestPhase::AwaitingApproval, origin, &record);

        let request = PopupRequest::ApproveOperation {
            website: origin.to_string(),
            uuid,
            operation,
        };
        let popup = match self.popups.open(&request).await {
            Ok(popup) => popup,
            Err(e) => {
                let _ = self.state.session.take_pending(&uuid);
                return Err(e);
            }
        };
        self.popups.wait_closed(popup).await;

        let decided = self
            .state
            .session
            .take_pending(&uuid)?
            .ok_or(WalletError::OperationNotFound)?;
        log_phase(RequestPhase::Resolved, origin, &decided);
        match decided.is_approved {
            Some(true) => Ok(()),
            _ => Err(WalletError::UserRejected),
        }
    }

    // =========================================================================
    // Preconditions
    // =========================================================================

    /// Initialised network and unlocked session.
    fn check_ready(&self) -> Result<Network, WalletError> {
        let network = self.state.current_network()?.ok_or(WalletError::NetworkNotInitialized)?;
        if !self.state.is_unlocked()? {
            return Err(WalletError::NotLoggedIn);
        }
        debug!(phase = RequestPhase::Received.as_str(), network_id = %network.network_id, "Preconditions met");
        Ok(network)
    }

    /// Re-validate after approval and decrypt the accounts.
    fn ready_accounts(&self) -> Result<(Network, Vec<AccountWithPrivateKey>), WalletError> {
        let network = self.check_ready()?;
        let accounts = self.state.accounts()?.ok_or(WalletError::NoAccounts)?;
        Ok((network, accounts))
    }
}

fn log_phase(phase: RequestPhase, origin: &str, record: &PendingApproval) {
    info!(
        phase = phase.as_str(),
        origin = %origin,
        uuid = %record.uuid,
        operation = %record.data_type,
        approved = ?record.is_approved,
        "Approval request"
    );
}

/// Accounts for the given ids, in first-seen order without repeats. A
/// missing id fails the whole selection.
fn select_accounts<'a>(
    stored: &[AccountWithPrivateKey],
    ids: impl IntoIterator<Item = &'a str>,
    missing: impl Fn(&str) -> WalletError,
) -> Result<Vec<AccountWithPrivateKey>, WalletError> {
    let mut selected: Vec<AccountWithPrivateKey> = Vec::new();
    for id in ids {
        if selected.iter().any(|a| a.account_id == id) {
            continue;
        }
        let account = stored.iter().find(|a| a.account_id == id).ok_or_else(|| missing(id))?;
        selected.push(account.clone());
    }
    Ok(selected)
}

fn data<T: Serialize>(value: &T) -> Result<BackgroundResponse, WalletError> {
    serde_json::to_value(value)
        .map(BackgroundResponse::Data)
        .map_err(|e| WalletError::InvalidMessage(format!("failed to encode response: {e}")))
}

/// Params that may be omitted entirely.
fn params_or_default<T: DeserializeOwned + Default>(envelope: &Envelope) -> Result<T, WalletError> {
    match &envelope.params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(_) => envelope.params_as(),
    }
}
