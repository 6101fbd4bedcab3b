// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Approval Popups
//!
//! Popup windows are launched with their whole job encoded in the query
//! string of the extension page URL:
//!
//! | Parameter | Meaning |
//! |-----------|---------|
//! | `injectedApiMethod` | `connect`, `changeNetwork` or `signTransaction` |
//! | `website` | Origin of the requesting page |
//! | `network` | Requested network id (`changeNetwork`) |
//! | `transactionUuid` | Pending approval record (`signTransaction`) |
//! | `operationType` | `signTransactions`, `signIn` or `signOut` |
//!
//! A popup writes its decision to storage, waits the configured close delay
//! and then closes its own window. The background treats the window going
//! away as "decision made" and reads the outcome back from storage.

pub mod approve;
pub mod connect;
pub mod network;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::browser::{OpenedPopup, WindowId, WindowManager};
use crate::error::WalletError;
use crate::state::WalletState;
use crate::storage::OperationType;

pub use approve::ApproveOperationPopup;
pub use connect::ConnectAccountsPopup;
pub use network::ConfirmNetworkChangePopup;

pub const INJECTED_API_METHOD_PARAM: &str = "injectedApiMethod";
pub const WEBSITE_PARAM: &str = "website";
pub const NETWORK_PARAM: &str = "network";
pub const TRANSACTION_UUID_PARAM: &str = "transactionUuid";
pub const OPERATION_TYPE_PARAM: &str = "operationType";

const CONNECT_VALUE: &str = "connect";
const CHANGE_NETWORK_VALUE: &str = "changeNetwork";
const APPROVE_OPERATION_VALUE: &str = "signTransaction";

/// What a popup window was opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupRequest {
    ConnectAccounts {
        website: String,
    },
    ChangeNetwork {
        website: String,
        network_id: String,
    },
    ApproveOperation {
        website: String,
        uuid: Uuid,
        operation: OperationType,
    },
}

impl PopupRequest {
    pub fn website(&self) -> &str {
        match self {
            Self::ConnectAccounts { website }
            | Self::ChangeNetwork { website, .. }
            | Self::ApproveOperation { website, .. } => website,
        }
    }

    /// Extension page URL carrying this request.
    pub fn to_url(&self, base: &str) -> Result<Url, WalletError> {
        let mut url = Url::parse(base).map_err(|e| WalletError::Popup(format!("bad extension URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            match self {
                Self::ConnectAccounts { website } => {
                    query
                        .append_pair(INJECTED_API_METHOD_PARAM, CONNECT_VALUE)
                        .append_pair(WEBSITE_PARAM, website);
                }
                Self::ChangeNetwork { website, network_id } => {
                    query
                        .append_pair(INJECTED_API_METHOD_PARAM, CHANGE_NETWORK_VALUE)
                        .append_pair(WEBSITE_PARAM, website)
                        .append_pair(NETWORK_PARAM, network_id);
                }
                Self::ApproveOperation {
                    website,
                    uuid,
                    operation,
                } => {
                    query
                        .append_pair(INJECTED_API_METHOD_PARAM, APPROVE_OPERATION_VALUE)
                        .append_pair(WEBSITE_PARAM, website)
                        .append_pair(TRANSACTION_UUID_PARAM, &uuid.to_string())
                        .append_pair(OPERATION_TYPE_PARAM, operation.as_str());
                }
            }
        }
        Ok(url)
    }

    /// Read the request back from a popup's URL.
    pub fn from_url(url: &Url) -> Result<Self, WalletError> {
        let param = |name: &str| {
            url.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };
        let required = |name: &str| {
            param(name).ok_or_else(|| WalletError::InvalidMessage(format!("popup URL is missing {name}")))
        };

        let website = param(WEBSITE_PARAM).unwrap_or_default();
        match required(INJECTED_API_METHOD_PARAM)?.as_str() {
            CONNECT_VALUE => Ok(Self::ConnectAccounts { website }),
            CHANGE_NETWORK_VALUE => Ok(Self::ChangeNetwork {
                website,
                network_id: required(NETWORK_PARAM)?,
            }),
            APPROVE_OPERATION_VALUE => {
                let uuid = required(TRANSACTION_UUID_PARAM)?
                    .parse::<Uuid>()
                    .map_err(|e| WalletError::InvalidMessage(format!("bad transactionUuid: {e}")))?;
                let operation = required(OPERATION_TYPE_PARAM)?
                    .parse::<OperationType>()
                    .map_err(WalletError::InvalidMessage)?;
                Ok(Self::ApproveOperation {
                    website,
                    uuid,
                    operation,
                })
            }
            other => Err(WalletError::InvalidMessage(format!("unknown popup method {other}"))),
        }
    }
}

/// Handles a popup page works with.
#[derive(Clone)]
pub struct PopupContext {
    pub state: WalletState,
    pub windows: Arc<dyn WindowManager>,
    pub window_id: WindowId,
    pub close_delay: Duration,
}

impl PopupContext {
    /// Let the user see the outcome, then close the window.
    pub(crate) async fn close_after_delay(&self) {
        tokio::time::sleep(self.close_delay).await;
        debug!(window_id = self.window_id, "Closing popup");
        self.windows.close(self.window_id).await;
    }
}

/// A loaded popup page.
pub enum PopupPage {
    ConnectAccounts(ConnectAccountsPopup),
    ChangeNetwork(ConfirmNetworkChangePopup),
    ApproveOperation(ApproveOperationPopup),
}

impl PopupPage {
    pub fn load(
        state: WalletState,
        windows: Arc<dyn WindowManager>,
        opened: &OpenedPopup,
        close_delay: Duration,
    ) -> Result<Self, WalletError> {
        let ctx = PopupContext {
            state,
            windows,
            window_id: opened.id,
            close_delay,
        };
        let page = match PopupRequest::from_url(&opened.spec.url)? {
            PopupRequest::ConnectAccounts { website } => {
                Self::ConnectAccounts(ConnectAccountsPopup::load(ctx, website)?)
            }
            PopupRequest::ChangeNetwork { website, network_id } => {
                Self::ChangeNetwork(ConfirmNetworkChangePopup::load(ctx, website, &network_id)?)
            }
            PopupRequest::ApproveOperation {
                website,
                uuid,
                operation,
            } => Self::ApproveOperation(ApproveOperationPopup::load(ctx, website, uuid, operation)?),
        };
        Ok(page)
    }

    /// Accept with the page's current selection.
    pub async fn confirm(self) -> Result<(), WalletError> {
        match self {
            Self::ConnectAccounts(popup) => popup.confirm().await.map(|_| ()),
            Self::ChangeNetwork(popup) => popup.confirm().await,
            Self::ApproveOperation(popup) => popup.confirm().await,
        }
    }

    pub async fn cancel(self) -> Result<(), WalletError> {
        match self {
            Self::ConnectAccounts(popup) => popup.cancel().await,
            Self::ChangeNetwork(popup) => popup.cancel().await,
            Self::ApproveOperation(popup) => popup.cancel().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "chrome-extension://dao-wallet/index.html";

    #[test]
    fn approve_request_survives_the_url() {
        let request = PopupRequest::ApproveOperation {
            website: "https://app.example".into(),
            uuid: Uuid::new_v4(),
            operation: OperationType::SignIn,
        };
        let url = request.to_url(BASE).unwrap();
        assert!(url.as_str().contains("injectedApiMethod=signTransaction"));
        assert!(url.as_str().contains("operationType=signIn"));
        assert_eq!(PopupRequest::from_url(&url).unwrap(), request);
    }

    #[test]
    fn website_is_percent_encoded() {
        let request = PopupRequest::ChangeNetwork {
            website: "https://app.example:8443".into(),
            network_id: "mainnet".into(),
        };
        let url = request.to_url(BASE).unwrap();
        assert!(url.as_str().contains("website=https%3A%2F%2Fapp.example%3A8443"));
        assert_eq!(PopupRequest::from_url(&url).unwrap().website(), "https://app.example:8443");
    }

    #[test]
    fn incomplete_urls_are_rejected() {
        let url = Url::parse(&format!("{BASE}?injectedApiMethod=changeNetwork&website=x")).unwrap();
        assert!(matches!(PopupRequest::from_url(&url), Err(WalletError::InvalidMessage(_))));

        let url = Url::parse(&format!("{BASE}?injectedApiMethod=selfDestruct")).unwrap();
        assert!(PopupRequest::from_url(&url).is_err());
    }
}
