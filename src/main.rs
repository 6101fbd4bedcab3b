// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dao_wallet::config::WalletConfig;
use dao_wallet::{host, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let config = WalletConfig::from_env();
    if let Err(e) = logging::init(config.log_format) {
        eprintln!("Failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    info!(data_dir = %config.data_dir.display(), origin = %config.page_origin, "DAO wallet host starting");
    match host::run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Host stopped with an error");
            ExitCode::FAILURE
        }
    }
}
