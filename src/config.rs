// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults and the [`WalletConfig`] loaded from
//! them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the durable extension store | `./data` |
//! | `NEAR_RPC_TIMEOUT_SECS` | Timeout for each NEAR JSON-RPC request | `10` |
//! | `POPUP_CLOSE_DELAY_MS` | Delay between a popup decision and its window closing | `1000` |
//! | `MAX_OPEN_POPUPS` | Soft cap on concurrently open approval popups | `5` |
//! | `EXTENSION_URL` | Popup page URL inside the extension | `chrome-extension://dao-wallet/index.html` |
//! | `PAGE_ORIGIN` | Origin of the page served by the host binary | `http://localhost:3000` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable name for the durable store directory.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Default data directory when `DATA_DIR` is unset.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// File name of the redb database inside the data directory.
pub const LOCAL_STORE_FILE: &str = "local.redb";

/// Environment variable name for the NEAR RPC request timeout (seconds).
pub const NEAR_RPC_TIMEOUT_ENV: &str = "NEAR_RPC_TIMEOUT_SECS";

pub const DEFAULT_NEAR_RPC_TIMEOUT_SECS: u64 = 10;

/// Environment variable name for the popup close delay (milliseconds).
///
/// The popup keeps its window open this long after writing its decision so
/// the user sees the outcome.
pub const POPUP_CLOSE_DELAY_ENV: &str = "POPUP_CLOSE_DELAY_MS";

pub const DEFAULT_POPUP_CLOSE_DELAY_MS: u64 = 1000;

/// Environment variable name for the soft cap on open popups.
pub const MAX_OPEN_POPUPS_ENV: &str = "MAX_OPEN_POPUPS";

pub const DEFAULT_MAX_OPEN_POPUPS: usize = 5;

/// Environment variable name for the extension popup page URL.
pub const EXTENSION_URL_ENV: &str = "EXTENSION_URL";

pub const DEFAULT_EXTENSION_URL: &str = "chrome-extension://dao-wallet/index.html";

/// Environment variable name for the page origin the host binary serves.
pub const PAGE_ORIGIN_ENV: &str = "PAGE_ORIGIN";

pub const DEFAULT_PAGE_ORIGIN: &str = "http://localhost:3000";

/// Environment variable name for the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Settings shared by every context of the extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
    pub data_dir: PathBuf,
    pub rpc_timeout: Duration,
    pub popup_close_delay: Duration,
    pub max_open_popups: usize,
    pub extension_url: String,
    pub page_origin: String,
    pub log_format: LogFormat,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            rpc_timeout: Duration::from_secs(DEFAULT_NEAR_RPC_TIMEOUT_SECS),
            popup_close_delay: Duration::from_millis(DEFAULT_POPUP_CLOSE_DELAY_MS),
            max_open_popups: DEFAULT_MAX_OPEN_POPUPS,
            extension_url: DEFAULT_EXTENSION_URL.to_string(),
            page_origin: DEFAULT_PAGE_ORIGIN.to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl WalletConfig {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load the configuration through an arbitrary lookup.
    ///
    /// Unparseable numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            data_dir: lookup(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            rpc_timeout: number(NEAR_RPC_TIMEOUT_ENV)
                .map(Duration::from_secs)
                .unwrap_or(defaults.rpc_timeout),
            popup_close_delay: number(POPUP_CLOSE_DELAY_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.popup_close_delay),
            max_open_popups: number(MAX_OPEN_POPUPS_ENV)
                .map(|n| n as usize)
                .unwrap_or(defaults.max_open_popups),
            extension_url: lookup(EXTENSION_URL_ENV).unwrap_or(defaults.extension_url),
            page_origin: lookup(PAGE_ORIGIN_ENV).unwrap_or(defaults.page_origin),
            log_format: lookup(LOG_FORMAT_ENV)
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
        }
    }

    /// Path of the durable local store.
    pub fn local_store_path(&self) -> PathBuf {
        self.data_dir.join(LOCAL_STORE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = WalletConfig::from_lookup(|_| None);
        assert_eq!(config, WalletConfig::default());
        assert_eq!(config.popup_close_delay, Duration::from_millis(1000));
        assert_eq!(config.max_open_popups, 5);
        assert_eq!(config.local_store_path(), PathBuf::from("./data/local.redb"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = WalletConfig::from_lookup(lookup_from(&[
            (DATA_DIR_ENV, "/tmp/wallet"),
            (NEAR_RPC_TIMEOUT_ENV, "3"),
            (POPUP_CLOSE_DELAY_ENV, "25"),
            (MAX_OPEN_POPUPS_ENV, "2"),
            (LOG_FORMAT_ENV, "JSON"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/wallet"));
        assert_eq!(config.rpc_timeout, Duration::from_secs(3));
        assert_eq!(config.popup_close_delay, Duration::from_millis(25));
        assert_eq!(config.max_open_popups, 2);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn garbage_numbers_fall_back_to_defaults() {
        let config = WalletConfig::from_lookup(lookup_from(&[
            (NEAR_RPC_TIMEOUT_ENV, "soon"),
            (MAX_OPEN_POPUPS_ENV, "-1"),
        ]));
        assert_eq!(config.rpc_timeout, Duration::from_secs(10));
        assert_eq!(config.max_open_popups, 5);
    }
}
