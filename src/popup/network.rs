// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Confirm-network-change popup.

use tracing::info;

use super::PopupContext;
use crate::error::WalletError;
use crate::models::Network;

pub struct ConfirmNetworkChangePopup {
    ctx: PopupContext,
    website: String,
    requested: Network,
    current: Option<Network>,
}

impl ConfirmNetworkChangePopup {
    pub fn load(ctx: PopupContext, website: String, network_id: &str) -> Result<Self, WalletError> {
        let requested = ctx
            .state
            .local
            .networks()?
            .into_iter()
            .find(|n| n.network_id == network_id)
            .ok_or_else(|| WalletError::UnsupportedNetwork(network_id.to_string()))?;
        let current = ctx.state.current_network()?;
        Ok(Self {
            ctx,
            website,
            requested,
            current,
        })
    }

    pub fn website(&self) -> &str {
        &self.website
    }

    pub fn requested(&self) -> &Network {
        &self.requested
    }

    pub fn current(&self) -> Option<&Network> {
        self.current.as_ref()
    }

    /// Switch the extension to the requested network and close.
    pub async fn confirm(self) -> Result<(), WalletError> {
        let switched = self.ctx.state.local.select_network_by_id(&self.requested.network_id)?;
        if !switched {
            return Err(WalletError::UnsupportedNetwork(self.requested.network_id.clone()));
        }
        info!(
            website = %self.website,
            network_id = %self.requested.network_id,
            "Network switched on website request"
        );
        self.ctx.close_after_delay().await;
        Ok(())
    }

    pub async fn cancel(self) -> Result<(), WalletError> {
        self.ctx.close_after_delay().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::HeadlessWindows;
    use crate::state::tests::test_state;
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> PopupContext {
        PopupContext {
            state: test_state(),
            windows: Arc::new(HeadlessWindows::default()),
            window_id: 1,
            close_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn confirm_switches_network() {
        let ctx = context();
        let state = ctx.state.clone();
        let popup = ConfirmNetworkChangePopup::load(ctx, "https://app.example".into(), "mainnet").unwrap();
        assert_eq!(popup.current().map(|n| n.network_id.as_str()), Some("testnet"));

        popup.confirm().await.unwrap();
        assert_eq!(state.network_info().unwrap().network_id, "mainnet");
    }

    #[tokio::test]
    async fn cancel_keeps_network() {
        let ctx = context();
        let state = ctx.state.clone();
        let popup = ConfirmNetworkChangePopup::load(ctx, "https://app.example".into(), "mainnet").unwrap();
        popup.cancel().await.unwrap();
        assert_eq!(state.network_info().unwrap().network_id, "testnet");
    }

    #[test]
    fn unknown_network_cannot_load() {
        assert!(matches!(
            ConfirmNetworkChangePopup::load(context(), "https://app.example".into(), "betanet"),
            Err(WalletError::UnsupportedNetwork(_))
        ));
    }
}
