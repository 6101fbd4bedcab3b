// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet error type and the error body that crosses context boundaries.
//!
//! Every failure that reaches a page is carried as an [`ErrorResponse`]
//! (`{"error": "...", "errorCode": "..."}`). The message is the
//! human-readable reason. The code lets a caller tell a user rejection apart
//! from a missing precondition without matching on text.

use serde::{Deserialize, Serialize};

use crate::blockchain::client::RpcError;
use crate::storage::{CipherError, StorageError};

/// Machine-readable classification of a [`WalletError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UserRejected,
    PreconditionFailed,
    NotFound,
    SigningFailed,
    Unsupported,
    UnknownMethod,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("User has no accounts in extension")]
    NoAccounts,

    #[error("Network is not initialized")]
    NetworkNotInitialized,

    #[error("User is not logged into extension")]
    NotLoggedIn,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("User rejected request")]
    UserRejected,

    #[error("Couldn't find signer account {0}")]
    SignerNotFound(String),

    #[error("Couldn't find account {0} in extension")]
    AccountNotFound(String),

    #[error("Couldn't find transaction")]
    OperationNotFound,

    #[error("Network {0} is not supported")]
    UnsupportedNetwork(String),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("NEAR RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Key encryption error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Failed to open popup: {0}")]
    Popup(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Message channel closed: {0}")]
    Transport(String),

    /// Error reported by another context and rebuilt from its [`ErrorResponse`].
    #[error("{message}")]
    Remote { code: ErrorCode, message: String },
}

impl WalletError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UserRejected => ErrorCode::UserRejected,
            Self::NoAccounts
            | Self::NetworkNotInitialized
            | Self::NotLoggedIn
            | Self::InvalidPassword => ErrorCode::PreconditionFailed,
            Self::SignerNotFound(_) | Self::AccountNotFound(_) | Self::OperationNotFound => {
                ErrorCode::NotFound
            }
            Self::InvalidKey(_) | Self::Signing(_) | Self::Rpc(_) => ErrorCode::SigningFailed,
            Self::UnsupportedNetwork(_) | Self::UnsupportedAction(_) => ErrorCode::Unsupported,
            Self::UnknownMethod(_) => ErrorCode::UnknownMethod,
            Self::Storage(_)
            | Self::Cipher(_)
            | Self::Popup(_)
            | Self::InvalidMessage(_)
            | Self::Transport(_) => ErrorCode::Internal,
            Self::Remote { code, .. } => *code,
        }
    }

    /// True when the user dismissed or declined an approval.
    pub fn is_user_rejection(&self) -> bool {
        self.code() == ErrorCode::UserRejected
    }

    /// Message safe to hand to a web page.
    ///
    /// Storage failures are reported generically so on-disk details stay in
    /// the extension's own logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) => "Internal error: extension storage is unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error body delivered to pages, popups and content scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: ErrorCode,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            error_code: code,
        }
    }
}

impl From<&WalletError> for ErrorResponse {
    fn from(err: &WalletError) -> Self {
        Self::new(err.code(), err.public_message())
    }
}

impl From<WalletError> for ErrorResponse {
    fn from(err: WalletError) -> Self {
        Self::from(&err)
    }
}

impl From<ErrorResponse> for WalletError {
    fn from(body: ErrorResponse) -> Self {
        WalletError::Remote {
            code: body.error_code,
            message: body.error,
        }
    }
}

pub type WalletResult<T> = Result<T, WalletError>;
