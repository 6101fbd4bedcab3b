// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wiring of all contexts into one running extension.
//!
//! One background coordinator serves every page. Each page gets its own bus,
//! content-script bridge and (optionally) injected API. Popups are loaded on
//! demand from the windows the background opens.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::background::{BackgroundCoordinator, PopupLauncher};
use crate::blockchain::RpcConnector;
use crate::browser::{HeadlessWindows, OpenedPopup};
use crate::config::WalletConfig;
use crate::content_script::{ContentScriptBridge, InjectionPoint, PageDocument};
use crate::error::WalletError;
use crate::injected_api::InjectedApi;
use crate::popup::PopupPage;
use crate::protocol::{PageBus, RuntimePort};
use crate::state::WalletState;

const RUNTIME_MAILBOX_CAPACITY: usize = 64;

pub struct ExtensionRuntime {
    state: WalletState,
    windows: Arc<HeadlessWindows>,
    background: Arc<BackgroundCoordinator>,
    port: RuntimePort,
    connector: Arc<dyn RpcConnector>,
    popup_close_delay: Duration,
    shutdown: CancellationToken,
}

/// Contexts attached to one page.
pub struct PageSession {
    pub bus: PageBus,
    pub bridge: Arc<ContentScriptBridge>,
    pub injection: InjectionPoint,
    shutdown: CancellationToken,
}

impl PageSession {
    /// Start the in-page wallet API for this page.
    pub fn start_api(&self) -> Arc<InjectedApi> {
        InjectedApi::start(self.bus.clone(), self.shutdown.child_token())
    }
}

impl ExtensionRuntime {
    /// Start the background coordinator.
    pub fn start(
        config: &WalletConfig,
        state: WalletState,
        windows: Arc<HeadlessWindows>,
        connector: Arc<dyn RpcConnector>,
        shutdown: CancellationToken,
    ) -> Self {
        let popups = PopupLauncher::new(windows.clone(), config.extension_url.clone(), config.max_open_popups);
        let background = Arc::new(BackgroundCoordinator::new(state.clone(), popups));
        let (port, mailbox) = RuntimePort::channel(RUNTIME_MAILBOX_CAPACITY);
        tokio::spawn(Arc::clone(&background).run(mailbox, shutdown.child_token()));
        info!(extension_url = %config.extension_url, "Extension runtime started");

        Self {
            state,
            windows,
            background,
            port,
            connector,
            popup_close_delay: config.popup_close_delay,
            shutdown,
        }
    }

    pub fn state(&self) -> &WalletState {
        &self.state
    }

    pub fn windows(&self) -> &Arc<HeadlessWindows> {
        &self.windows
    }

    pub fn background(&self) -> &Arc<BackgroundCoordinator> {
        &self.background
    }

    /// Load the content script into a document. `None` when the document is
    /// not eligible.
    pub fn open_page(&self, document: &PageDocument) -> Option<PageSession> {
        let bus = PageBus::new(document.origin());
        let bridge = Arc::new(ContentScriptBridge::new(
            bus.clone(),
            self.port.clone(),
            Arc::clone(&self.connector),
            Arc::clone(self.state.local.raw()),
            Arc::clone(self.state.session.raw()),
        ));
        let injection = bridge.prepare_injection(document)?;
        let shutdown = self.shutdown.child_token();
        Arc::clone(&bridge).start(shutdown.clone());
        info!(origin = %bus.origin(), ?injection, "Content script attached");
        Some(PageSession {
            bus,
            bridge,
            injection,
            shutdown,
        })
    }

    /// Popup page for a window the background opened.
    pub fn load_popup(&self, popup: &OpenedPopup) -> Result<PopupPage, WalletError> {
        PopupPage::load(
            self.state.clone(),
            self.windows.clone(),
            popup,
            self.popup_close_delay,
        )
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
