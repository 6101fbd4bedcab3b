// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Approve-operation popup.
//!
//! Loads the pending approval named in its URL, renders what will be signed
//! and records the user's answer on the record before closing.

use tracing::{info, warn};
use uuid::Uuid;

use super::PopupContext;
use crate::browser::WindowManager;
use crate::blockchain::actions::{AccessKeyPermission, Action, WireAction};
use crate::blockchain::types::Balance;
use crate::error::WalletError;
use crate::models::{ConnectedAccount, SignInPermission};
use crate::storage::{OperationPayload, OperationType, PendingApproval};

/// Shown when the record is gone or does not match the request.
pub const MISSING_OPERATION_MESSAGE: &str = "Failed to find transaction";

const YOCTO_PER_NEAR: Balance = 1_000_000_000_000_000_000_000_000;
const NEAR_DECIMALS: usize = 24;

/// Human view of one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSummary {
    pub kind: String,
    pub details: Vec<(String, String)>,
    /// False when the action cannot be signed by this wallet.
    pub supported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSummary {
    pub signer_id: String,
    pub receiver_id: String,
    pub actions: Vec<ActionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationSummary {
    Transactions(Vec<TransactionSummary>),
    SignIn {
        permission: SignInPermission,
        accounts: Vec<ConnectedAccount>,
    },
    SignOut {
        accounts: Vec<ConnectedAccount>,
    },
}

pub struct ApproveOperationPopup {
    ctx: PopupContext,
    website: String,
    uuid: Uuid,
    operation: OperationType,
    record: Option<PendingApproval>,
}

impl ApproveOperationPopup {
    pub fn load(
        ctx: PopupContext,
        website: String,
        uuid: Uuid,
        operation: OperationType,
    ) -> Result<Self, WalletError> {
        let record = ctx
            .state
            .session
            .pending(&uuid)?
            .filter(|record| record.data_type == operation);
        if record.is_none() {
            warn!(%uuid, operation = %operation, "Approval popup opened for a missing operation");
        }
        Ok(Self {
            ctx,
            website,
            uuid,
            operation,
            record,
        })
    }

    pub fn website(&self) -> &str {
        &self.website
    }

    pub fn operation(&self) -> OperationType {
        self.operation
    }

    /// Error state shown instead of the operation.
    pub fn error(&self) -> Option<&'static str> {
        self.record.is_none().then_some(MISSING_OPERATION_MESSAGE)
    }

    pub fn can_confirm(&self) -> bool {
        self.record.is_some()
    }

    pub fn summary(&self) -> Option<OperationSummary> {
        let record = self.record.as_ref()?;
        Some(match &record.data {
            OperationPayload::Transactions(intents) => OperationSummary::Transactions(
                intents
                    .iter()
                    .map(|intent| TransactionSummary {
                        signer_id: intent.signer_id.clone(),
                        receiver_id: intent.receiver_id.clone(),
                        actions: intent.actions.iter().map(describe_action).collect(),
                    })
                    .collect(),
            ),
            OperationPayload::SignIn(params) => OperationSummary::SignIn {
                permission: params.permission.clone(),
                accounts: params.accounts.clone(),
            },
            OperationPayload::SignOut(params) => OperationSummary::SignOut {
                accounts: params.accounts.clone(),
            },
        })
    }

    /// Approve, then close after the delay.
    pub async fn confirm(self) -> Result<(), WalletError> {
        if !self.can_confirm() {
            return Err(WalletError::OperationNotFound);
        }
        self.record_approval().await
    }

    /// Close without deciding. The record stays undecided, which the
    /// background treats as a rejection. Works in the error state too.
    pub async fn cancel(self) -> Result<(), WalletError> {
        info!(uuid = %self.uuid, "Approval popup dismissed");
        self.ctx.windows.close(self.ctx.window_id).await;
        Ok(())
    }

    async fn record_approval(self) -> Result<(), WalletError> {
        let written = self.ctx.state.session.set_approval(&self.uuid, true);
        match &written {
            Ok(Some(_)) => info!(uuid = %self.uuid, "Recorded approval"),
            Ok(None) => warn!(uuid = %self.uuid, "Operation vanished before the decision was recorded"),
            Err(e) => warn!(uuid = %self.uuid, error = %e, "Failed to record approval decision"),
        }
        // The window closes either way so the waiting request can settle.
        self.ctx.close_after_delay().await;
        written?;
        Ok(())
    }
}

/// Render one wire action for display.
pub fn describe_action(wire: &WireAction) -> ActionSummary {
    let Ok(action) = Action::try_from(wire) else {
        return ActionSummary {
            kind: wire.kind.clone(),
            details: vec![("payload".into(), wire.payload().to_string())],
            supported: false,
        };
    };

    let details = match &action {
        Action::CreateAccount => vec![],
        Action::DeployContract { code } => vec![("code".into(), format!("{} bytes", code.len()))],
        Action::FunctionCall {
            method_name,
            args,
            gas,
            deposit,
        } => vec![
            ("method".into(), method_name.clone()),
            ("args".into(), String::from_utf8_lossy(args).into_owned()),
            ("gas".into(), gas.to_string()),
            ("deposit".into(), format_near(*deposit)),
        ],
        Action::Transfer { deposit } => vec![("amount".into(), format_near(*deposit))],
        Action::Stake { stake, public_key } => vec![
            ("stake".into(), format_near(*stake)),
            ("publicKey".into(), public_key.to_string()),
        ],
        Action::AddKey {
            public_key,
            access_key,
        } => {
            let mut details = vec![("publicKey".into(), public_key.to_string())];
            match &access_key.permission {
                AccessKeyPermission::FullAccess => details.push(("permission".into(), "full access".into())),
                AccessKeyPermission::FunctionCall(permission) => {
                    details.push(("receiver".into(), permission.receiver_id.clone()));
                    let methods = if permission.method_names.is_empty() {
                        "any".to_string()
                    } else {
                        permission.method_names.join(", ")
                    };
                    details.push(("methods".into(), methods));
                    if let Some(allowance) = permission.allowance {
                        details.push(("allowance".into(), format_near(allowance)));
                    }
                }
            }
            details
        }
        Action::DeleteKey { public_key } => vec![("publicKey".into(), public_key.to_string())],
        Action::DeleteAccount { beneficiary_id } => vec![("beneficiary".into(), beneficiary_id.clone())],
    };

    ActionSummary {
        kind: action.kind().to_string(),
        details,
        supported: true,
    }
}

/// Yocto amount as NEAR with trailing zeros trimmed.
pub fn format_near(yocto: Balance) -> String {
    let whole = yocto / YOCTO_PER_NEAR;
    let fraction = yocto % YOCTO_PER_NEAR;
    if fraction == 0 {
        return format!("{whole} NEAR");
    }
    let digits = format!("{fraction:0>width$}", width = NEAR_DECIMALS);
    format!("{whole}.{} NEAR", digits.trim_end_matches('0'))
}
