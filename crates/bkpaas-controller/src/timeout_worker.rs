// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deploy watchdog.
//!
//! Periodically sweeps deploy rows: non-terminal deploys past the deploy
//! budget become `ERROR` with reason `Timeout`; `PENDING` deploys with no
//! progress signal become `UNKNOWN` (non-terminal) so operators can tell a
//! stuck deploy from a slow one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info};

use bkpaas_core::config::Config;
use bkpaas_core::tracker::DeployTracker;

/// Watchdog configuration.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often to sweep.
    pub poll_interval: Duration,
    /// Wall-clock budget of a deploy.
    pub deploy_timeout: chrono::Duration,
    /// How long a `PENDING` deploy may sit before it is flagged `UNKNOWN`.
    pub unknown_after: chrono::Duration,
}

impl WatchdogConfig {
    /// Derive the watchdog settings from configuration.
    pub fn from_config(config: &Config) -> Self {
        let timeout_seconds = config.deploy_timeout_seconds as i64;
        Self {
            poll_interval: Duration::from_secs(30),
            deploy_timeout: chrono::Duration::seconds(timeout_seconds),
            // Flag a silent PENDING deploy well before the hard budget.
            unknown_after: chrono::Duration::seconds((timeout_seconds / 6).max(60)),
        }
    }
}

/// Deploy watchdog that runs as a background task.
pub struct DeployWatchdog {
    tracker: Arc<DeployTracker>,
    config: WatchdogConfig,
    shutdown: Arc<Notify>,
}

impl DeployWatchdog {
    /// Create a watchdog.
    pub fn new(tracker: Arc<DeployTracker>, config: WatchdogConfig) -> Self {
        Self {
            tracker,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the watchdog loop.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            timeout_secs = self.config.deploy_timeout.num_seconds(),
            "deploy watchdog started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("deploy watchdog shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "watchdog sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep: flag silent deploys, expire overdue ones.
    pub async fn sweep(&self) -> Result<(), bkpaas_core::error::CoreError> {
        let flagged = self
            .tracker
            .mark_stale_unknown(self.config.unknown_after)
            .await?;
        if !flagged.is_empty() {
            info!(count = flagged.len(), "deploys flagged UNKNOWN");
        }

        let expired = self
            .tracker
            .expire_timed_out(self.config.deploy_timeout)
            .await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "deploys expired with reason Timeout");
        }
        Ok(())
    }
}
