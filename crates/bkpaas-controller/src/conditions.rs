// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Condition ingestion.
//!
//! The cluster-side watcher reports `BkApp` status updates; this sink maps
//! the `AppAvailable` condition onto deploy transitions:
//!
//! | condition status | deploy transition |
//! |---|---|
//! | `True` | `READY` |
//! | `False` | `ERROR`, condition reason carried over |
//! | `Unknown` | `PROGRESSING` |
//!
//! The tracker's terminal-state guard makes ingestion idempotent: repeated
//! or late reports against a finished deploy are ignored.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use bkpaas_core::persistence::DeployRecord;
use bkpaas_core::tracker::{DeployStatus, DeployTracker};

use crate::error::Result;

/// The condition type the platform watches.
pub const APP_AVAILABLE: &str = "AppAvailable";

/// Maps watcher-reported CR status onto the deploy state machine.
pub struct ConditionSink {
    tracker: Arc<DeployTracker>,
}

impl ConditionSink {
    /// Create a sink over the given tracker.
    pub fn new(tracker: Arc<DeployTracker>) -> Self {
        Self { tracker }
    }

    /// Ingest one reported `status` subtree for a deploy.
    ///
    /// Returns the deploy row after the transition, or `None` when the
    /// status carries no `AppAvailable` condition yet.
    #[instrument(skip(self, status), fields(deploy_id = %deploy_id))]
    pub async fn ingest(&self, deploy_id: &str, status: &Value) -> Result<Option<DeployRecord>> {
        let Some(condition) = find_condition(status, APP_AVAILABLE) else {
            debug!("no AppAvailable condition reported yet");
            return Ok(None);
        };

        let reason = condition["reason"].as_str();
        let message = condition["message"].as_str();

        let record = match condition["status"].as_str() {
            Some("True") => {
                self.tracker
                    .transition(
                        deploy_id,
                        DeployStatus::Ready,
                        reason.or(Some(APP_AVAILABLE)),
                        message,
                    )
                    .await?
            }
            Some("False") => {
                self.tracker
                    .transition(
                        deploy_id,
                        DeployStatus::Error,
                        reason.or(Some("AppUnavailable")),
                        message,
                    )
                    .await?
            }
            _ => {
                self.tracker
                    .transition(deploy_id, DeployStatus::Progressing, reason, message)
                    .await?
            }
        };
        Ok(Some(record))
    }
}

/// Find a condition by type in a CR `status` subtree.
fn find_condition<'a>(status: &'a Value, condition_type: &str) -> Option<&'a Value> {
    status["conditions"]
        .as_array()?
        .iter()
        .find(|c| c["type"] == condition_type)
}
