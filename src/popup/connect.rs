// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Connect-accounts popup: the user picks which stored accounts a website
//! may see.

use std::collections::BTreeSet;

use tracing::info;

use super::PopupContext;
use crate::blockchain::keys::implicit_account_id;
use crate::error::WalletError;
use crate::models::{Account, ConnectedAccount};

pub struct ConnectAccountsPopup {
    ctx: PopupContext,
    website: String,
    accounts: Vec<Account>,
    selected: BTreeSet<usize>,
}

impl ConnectAccountsPopup {
    /// Load the stored accounts with the website's current grant preselected.
    pub fn load(ctx: PopupContext, website: String) -> Result<Self, WalletError> {
        let accounts = ctx.state.local.accounts()?;
        if accounts.is_empty() {
            return Err(WalletError::NoAccounts);
        }
        let granted = ctx.state.local.website_account_ids(&website)?;
        let selected = accounts
            .iter()
            .enumerate()
            .filter(|(_, account)| granted.iter().any(|id| grant_matches(account, id)))
            .map(|(index, _)| index)
            .collect();
        Ok(Self {
            ctx,
            website,
            accounts,
            selected,
        })
    }

    pub fn website(&self) -> &str {
        &self.website
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn is_selected(&self, account_id: &str) -> bool {
        self.index_of(account_id).is_some_and(|i| self.selected.contains(&i))
    }

    /// Flip one account. Returns the new selection state, `None` for an
    /// unknown account.
    pub fn toggle(&mut self, account_id: &str) -> Option<bool> {
        let index = self.index_of(account_id)?;
        if self.selected.remove(&index) {
            Some(false)
        } else {
            self.selected.insert(index);
            Some(true)
        }
    }

    /// Replace the selection with exactly these accounts.
    pub fn select_only(&mut self, account_ids: &[String]) -> Result<(), WalletError> {
        let mut selected = BTreeSet::new();
        for id in account_ids {
            let index = self
                .index_of(id)
                .ok_or_else(|| WalletError::AccountNotFound(id.clone()))?;
            selected.insert(index);
        }
        self.selected = selected;
        Ok(())
    }

    pub fn selected_accounts(&self) -> Vec<Account> {
        self.selected.iter().map(|&i| self.accounts[i].clone()).collect()
    }

    /// Save the grant and close. An empty selection disconnects the website.
    pub async fn confirm(self) -> Result<Vec<ConnectedAccount>, WalletError> {
        let selected = self.selected_accounts();
        self.ctx.state.connect_website(&self.website, &selected)?;
        info!(website = %self.website, count = selected.len(), "Website connected");
        let connected = self.ctx.state.website_connected_accounts(&self.website)?;
        self.ctx.close_after_delay().await;
        Ok(connected)
    }

    /// Close without touching the grant.
    pub async fn cancel(self) -> Result<(), WalletError> {
        info!(website = %self.website, "Connect request dismissed");
        self.ctx.close_after_delay().await;
        Ok(())
    }

    fn index_of(&self, account_id: &str) -> Option<usize> {
        self.accounts.iter().position(|a| grant_matches(a, account_id))
    }
}

fn grant_matches(account: &Account, id: &str) -> bool {
    account.account_id == id
        || account
            .public_key
            .as_deref()
            .and_then(|pk| implicit_account_id(pk).ok())
            .is_some_and(|implicit| implicit == id)
}
