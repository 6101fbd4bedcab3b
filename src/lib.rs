// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! DAO Wallet - NEAR browser-extension wallet core
//!
//! Every browser context of the extension is an actor on tokio. Pages talk to
//! the wallet through the injected API, the content script relays and signs,
//! the background decides and opens approval popups.
//!
//! ## Modules
//!
//! - `injected_api` - in-page wallet object (`window.daoWallet`)
//! - `content_script` - page ⇄ background relay, signing and change notifications
//! - `background` - request coordinator and popup launcher
//! - `popup` - connect, network-change and approval pages
//! - `protocol` - envelopes, method names, page bus and runtime port
//! - `blockchain` - NEAR keys, actions, transactions, RPC and signing
//! - `storage` - local and session key-value areas (redb, in-memory)
//! - `runtime` - wiring of all contexts
//! - `host` - headless NDJSON host

pub mod background;
pub mod blockchain;
pub mod browser;
pub mod config;
pub mod content_script;
pub mod error;
pub mod host;
pub mod injected_api;
pub mod logging;
pub mod models;
pub mod popup;
pub mod protocol;
pub mod runtime;
pub mod state;
pub mod storage;
