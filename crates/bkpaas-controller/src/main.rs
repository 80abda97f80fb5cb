// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! bkpaas controller entry point.
//!
//! Runs the deploy watchdog against the configured database. Transport
//! surfaces (HTTP, RPC) live outside this repository; embedders construct
//! the store, deployer and scaler from the library crates.

use std::sync::Arc;

use tracing::{info, warn};

use bkpaas_core::config::Config;
use bkpaas_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use bkpaas_core::tracker::DeployTracker;
use bkpaas_controller::timeout_worker::{DeployWatchdog, WatchdogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bkpaas_controller=info,bkpaas_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    info!(
        api_version = %config.api_version,
        deploy_timeout_seconds = config.deploy_timeout_seconds,
        "starting bkpaas controller"
    );

    // SQLite for embedded setups, PostgreSQL otherwise.
    let persistence: Arc<dyn Persistence> = if config.database_url.starts_with("sqlite") {
        Arc::new(SqlitePersistence::from_path(
            config.database_url.trim_start_matches("sqlite:"),
        )
        .await?)
    } else {
        Arc::new(PostgresPersistence::connect(&config.database_url).await?)
    };
    info!("connected to database");

    let tracker = Arc::new(DeployTracker::new(persistence));
    let watchdog = DeployWatchdog::new(tracker, WatchdogConfig::from_config(&config));
    let shutdown = watchdog.shutdown_handle();

    let worker = tokio::spawn(watchdog.run());

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown.notify_one();
    worker.await?;

    Ok(())
}
