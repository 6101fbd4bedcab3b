// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Browser window management seen from the background.
//!
//! [`WindowManager`] is the seam to the browser: open a popup, close it, and
//! learn when any window goes away. [`HeadlessWindows`] is the in-process
//! implementation used by the host binary and the tests. It also publishes
//! every opened popup so a driver can play the user.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;

use crate::error::WalletError;

pub type WindowId = u64;

const WINDOW_EVENTS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub top: i32,
    pub left: i32,
    pub width: i32,
    pub height: i32,
}

/// Request for a new popup window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupWindowSpec {
    pub url: Url,
    pub bounds: WindowBounds,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedPopup {
    pub id: WindowId,
    pub spec: PopupWindowSpec,
}

#[async_trait]
pub trait WindowManager: Send + Sync {
    /// Bounds of the last focused browser window, if any.
    async fn last_focused(&self) -> Option<WindowBounds>;

    async fn create_popup(&self, spec: PopupWindowSpec) -> Result<WindowId, WalletError>;

    /// Close a window. Closing an unknown window is a no-op.
    async fn close(&self, id: WindowId);

    async fn is_open(&self, id: WindowId) -> bool;

    /// Ids of windows as they are removed, whoever closed them.
    fn subscribe_removed(&self) -> broadcast::Receiver<WindowId>;
}

/// Windows kept in memory.
pub struct HeadlessWindows {
    next_id: AtomicU64,
    focused: Mutex<Option<WindowBounds>>,
    open: Mutex<HashMap<WindowId, PopupWindowSpec>>,
    opened: broadcast::Sender<OpenedPopup>,
    removed: broadcast::Sender<WindowId>,
}

impl HeadlessWindows {
    /// Headless browser with one focused window of the given bounds.
    pub fn new(focused: Option<WindowBounds>) -> Self {
        let (opened, _) = broadcast::channel(WINDOW_EVENTS_CAPACITY);
        let (removed, _) = broadcast::channel(WINDOW_EVENTS_CAPACITY);
        Self {
            next_id: AtomicU64::new(1),
            focused: Mutex::new(focused),
            open: Mutex::new(HashMap::new()),
            opened,
            removed,
        }
    }

    pub fn subscribe_opened(&self) -> broadcast::Receiver<OpenedPopup> {
        self.opened.subscribe()
    }

    pub fn set_last_focused(&self, bounds: Option<WindowBounds>) {
        if let Ok(mut focused) = self.focused.lock() {
            *focused = bounds;
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().map(|open| open.len()).unwrap_or(0)
    }

    pub fn spec(&self, id: WindowId) -> Option<PopupWindowSpec> {
        self.open.lock().ok()?.get(&id).cloned()
    }
}

impl Default for HeadlessWindows {
    fn default() -> Self {
        Self::new(Some(WindowBounds {
            top: 0,
            left: 0,
            width: 1280,
            height: 800,
        }))
    }
}

#[async_trait]
impl WindowManager for HeadlessWindows {
    async fn last_focused(&self) -> Option<WindowBounds> {
        self.focused.lock().ok().and_then(|focused| *focused)
    }

    async fn create_popup(&self, spec: PopupWindowSpec) -> Result<WindowId, WalletError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open
            .lock()
            .map_err(|_| WalletError::Popup("window table poisoned".into()))?
            .insert(id, spec.clone());
        debug!(window_id = id, url = %spec.url, "Popup opened");
        let _ = self.opened.send(OpenedPopup { id, spec });
        Ok(id)
    }

    async fn close(&self, id: WindowId) {
        let removed = self
            .open
            .lock()
            .map(|mut open| open.remove(&id).is_some())
            .unwrap_or(false);
        if removed {
            debug!(window_id = id, "Popup closed");
            let _ = self.removed.send(id);
        }
    }

    async fn is_open(&self, id: WindowId) -> bool {
        self.open.lock().map(|open| open.contains_key(&id)).unwrap_or(false)
    }

    fn subscribe_removed(&self) -> broadcast::Receiver<WindowId> {
        self.removed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PopupWindowSpec {
        PopupWindowSpec {
            url: Url::parse("chrome-extension://dao-wallet/index.html").unwrap(),
            bounds: WindowBounds {
                top: 0,
                left: 840,
                width: 440,
                height: 640,
            },
        }
    }

    #[tokio::test]
    async fn opened_popups_are_published_and_removals_announced_once() {
        let windows = HeadlessWindows::default();
        let mut opened = windows.subscribe_opened();
        let mut removed = windows.subscribe_removed();

        let id = windows.create_popup(spec()).await.unwrap();
        assert_eq!(opened.recv().await.unwrap().id, id);
        assert_eq!(windows.open_count(), 1);
        assert!(windows.is_open(id).await);

        windows.close(id).await;
        windows.close(id).await;
        assert_eq!(removed.recv().await.unwrap(), id);
        assert!(removed.try_recv().is_err());
        assert_eq!(windows.open_count(), 0);
    }

    #[tokio::test]
    async fn window_ids_are_unique() {
        let windows = HeadlessWindows::new(None);
        let a = windows.create_popup(spec()).await.unwrap();
        let b = windows.create_popup(spec()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(windows.last_focused().await, None);
    }
}
