// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Opening approval popups and waiting for them to close.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::browser::{PopupWindowSpec, WindowBounds, WindowId, WindowManager};
use crate::error::WalletError;
use crate::popup::PopupRequest;

pub const POPUP_WIDTH: i32 = 440;
pub const POPUP_HEIGHT: i32 = 640;

/// A popup the background is waiting on. Subscribed to removals before the
/// window was created, so a fast close is never missed.
pub struct OpenPopup {
    pub id: WindowId,
    removed: broadcast::Receiver<WindowId>,
}

pub struct PopupLauncher {
    windows: Arc<dyn WindowManager>,
    extension_url: String,
    max_open: usize,
    open: AtomicUsize,
}

impl PopupLauncher {
    pub fn new(windows: Arc<dyn WindowManager>, extension_url: impl Into<String>, max_open: usize) -> Self {
        Self {
            windows,
            extension_url: extension_url.into(),
            max_open,
            open: AtomicUsize::new(0),
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Popup bounds: aligned to the top-right corner of the last focused
    /// window, or the screen origin when there is none.
    pub fn position(last_focused: Option<WindowBounds>) -> WindowBounds {
        let (top, left) = match last_focused {
            Some(last) => (last.top, last.left + (last.width - POPUP_WIDTH)),
            None => (0, 0),
        };
        WindowBounds {
            top,
            left,
            width: POPUP_WIDTH,
            height: POPUP_HEIGHT,
        }
    }

    pub async fn open(&self, request: &PopupRequest) -> Result<OpenPopup, WalletError> {
        let url = request.to_url(&self.extension_url)?;
        let bounds = Self::position(self.windows.last_focused().await);

        let already_open = self.open.load(Ordering::SeqCst);
        if already_open >= self.max_open {
            warn!(open = already_open, limit = self.max_open, "Many approval popups are open");
        }

        let removed = self.windows.subscribe_removed();
        let id = self.windows.create_popup(PopupWindowSpec { url, bounds }).await?;
        self.open.fetch_add(1, Ordering::SeqCst);
        info!(window_id = id, website = %request.website(), "Opened approval popup");
        Ok(OpenPopup { id, removed })
    }

    /// Resolve once the popup's window is gone.
    pub async fn wait_closed(&self, popup: OpenPopup) {
        let OpenPopup { id, mut removed } = popup;
        loop {
            match removed.recv().await {
                Ok(closed) if closed == id => break,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(window_id = id, skipped, "Window events lagged, checking popup directly");
                    if !self.windows.is_open(id).await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        self.open.fetch_sub(1, Ordering::SeqCst);
        debug!(window_id = id, "Approval popup closed");
    }
}
