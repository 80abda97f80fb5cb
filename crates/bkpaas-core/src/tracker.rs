// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The deploy state machine.
//!
//! ```text
//! PENDING ──► PROGRESSING ──► READY        (terminal)
//!     │            │
//!     │            └────────► ERROR        (terminal)
//!     └─────────────────────► UNKNOWN      (watchdog, non-terminal)
//! ```
//!
//! Transitions are single guarded UPDATE statements: once a deploy reaches
//! `READY` or `ERROR` the row refuses further updates, and the refused
//! attempt is logged and ignored. Entering a terminal state publishes a
//! [`DeployEndEvent`] on a broadcast channel for external collaborators
//! (log shipper, metrics pipeline).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::persistence::{DeployRecord, ListDeploysFilter, Persistence};
use crate::store::ModuleRef;

/// Status of a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeployStatus {
    /// Created, reconciliation not started.
    Pending,
    /// Reconciliation in flight.
    Progressing,
    /// Terminal success.
    Ready,
    /// Terminal failure.
    Error,
    /// Watchdog state for deploys with no progress signal.
    Unknown,
}

impl DeployStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Progressing => "progressing",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// `READY` and `ERROR` are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "progressing" => Ok(Self::Progressing),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            "unknown" => Ok(Self::Unknown),
            other => Err(CoreError::validation(
                "status",
                format!("unknown deploy status '{}'", other),
            )),
        }
    }
}

/// End-of-deploy signal published when a deploy reaches a terminal state.
#[derive(Debug, Clone)]
pub struct DeployEndEvent {
    /// The deploy that ended.
    pub deploy_id: String,
    /// Owning module.
    pub module_id: String,
    /// Target environment.
    pub environment: String,
    /// Terminal status (`Ready` or `Error`).
    pub status: DeployStatus,
    /// Failure reason, set when `status` is `Error`.
    pub reason: Option<String>,
}

/// Caller-facing status view of a deploy.
#[derive(Debug, Clone, Serialize)]
pub struct DeployStatusView {
    /// Current status.
    pub status: DeployStatus,
    /// Machine-readable reason.
    pub reason: Option<String>,
    /// Human-readable message.
    pub message: Option<String>,
    /// When the status last changed.
    pub last_transition_time: chrono::DateTime<Utc>,
}

/// Tracks deploy rows through the state machine.
pub struct DeployTracker {
    persistence: Arc<dyn Persistence>,
    end_tx: broadcast::Sender<DeployEndEvent>,
}

impl DeployTracker {
    /// Create a tracker over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        let (end_tx, _) = broadcast::channel(64);
        Self {
            persistence,
            end_tx,
        }
    }

    /// Subscribe to end-of-deploy signals.
    pub fn subscribe(&self) -> broadcast::Receiver<DeployEndEvent> {
        self.end_tx.subscribe()
    }

    /// Open a deploy row in `PENDING`.
    ///
    /// `name` is caller-chosen and unique within (application, module,
    /// environment); a duplicate maps to [`CoreError::Conflict`].
    #[instrument(skip(self, module), fields(module_id = %module.module_id, environment = %environment))]
    pub async fn create(
        &self,
        module: &ModuleRef,
        environment: &str,
        name: &str,
        revision_id: &str,
        operator: &str,
    ) -> Result<DeployRecord> {
        let now = Utc::now();
        let deploy = DeployRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: module.tenant_id.clone(),
            application_id: module.application_id.clone(),
            module_id: module.module_id.clone(),
            environment: environment.to_string(),
            name: name.to_string(),
            revision_id: revision_id.to_string(),
            status: DeployStatus::Pending.as_str().to_string(),
            reason: None,
            message: None,
            operator: operator.to_string(),
            last_transition_time: now,
            created_at: now,
        };
        self.persistence.create_deploy(&deploy).await?;
        info!(deploy_id = %deploy.id, "deploy created");
        Ok(deploy)
    }

    /// Drive a deploy to a new status.
    ///
    /// Terminal rows absorb: a refused transition is logged and the current
    /// row is returned unchanged. Entering `READY` or `ERROR` publishes the
    /// end-of-deploy signal.
    #[instrument(skip(self, reason, message), fields(deploy_id = %deploy_id, status = %status))]
    pub async fn transition(
        &self,
        deploy_id: &str,
        status: DeployStatus,
        reason: Option<&str>,
        message: Option<&str>,
    ) -> Result<DeployRecord> {
        let current = self.get(deploy_id).await?;

        let applied = self
            .persistence
            .transition_deploy(deploy_id, status.as_str(), reason, message, Utc::now())
            .await?;

        if !applied {
            warn!(
                current_status = %current.status,
                "transition refused: deploy is in a terminal state"
            );
            return Ok(current);
        }

        let updated = self.get(deploy_id).await?;
        if status.is_terminal() {
            // Nobody listening is fine; send() only errors then.
            let _ = self.end_tx.send(DeployEndEvent {
                deploy_id: updated.id.clone(),
                module_id: updated.module_id.clone(),
                environment: updated.environment.clone(),
                status,
                reason: updated.reason.clone(),
            });
            info!(reason = ?updated.reason, "deploy reached terminal state");
        }
        Ok(updated)
    }

    /// A deploy row by id.
    pub async fn get(&self, deploy_id: &str) -> Result<DeployRecord> {
        self.persistence
            .get_deploy(deploy_id)
            .await?
            .ok_or_else(|| CoreError::not_found("deploy", deploy_id))
    }

    /// The caller-facing status view of a deploy.
    pub async fn get_status(&self, deploy_id: &str) -> Result<DeployStatusView> {
        let deploy = self.get(deploy_id).await?;
        Ok(DeployStatusView {
            status: deploy.status.parse()?,
            reason: deploy.reason,
            message: deploy.message,
            last_transition_time: deploy.last_transition_time,
        })
    }

    /// Deploys of a module, newest first.
    pub async fn list(
        &self,
        module_id: &str,
        filter: &ListDeploysFilter,
    ) -> Result<Vec<DeployRecord>> {
        self.persistence.list_deploys(module_id, filter).await
    }

    /// Watchdog sweep: deploys without a status change for longer than
    /// `timeout` become `ERROR` with reason `Timeout`.
    ///
    /// Returns the deploys that were timed out.
    pub async fn expire_timed_out(&self, timeout: Duration) -> Result<Vec<DeployRecord>> {
        let cutoff = Utc::now() - timeout;
        let stale = self
            .persistence
            .list_stale_deploys(&["pending", "progressing", "unknown"], cutoff)
            .await?;

        let mut expired = Vec::with_capacity(stale.len());
        for deploy in stale {
            let updated = self
                .transition(
                    &deploy.id,
                    DeployStatus::Error,
                    Some("Timeout"),
                    Some("deploy exceeded its wall-clock budget"),
                )
                .await?;
            expired.push(updated);
        }
        Ok(expired)
    }

    /// Watchdog sweep: `PENDING` deploys with no progress for longer than
    /// `stale_after` become `UNKNOWN` (non-terminal).
    pub async fn mark_stale_unknown(&self, stale_after: Duration) -> Result<Vec<DeployRecord>> {
        let cutoff = Utc::now() - stale_after;
        let stale = self
            .persistence
            .list_stale_deploys(&["pending"], cutoff)
            .await?;

        let mut marked = Vec::with_capacity(stale.len());
        for deploy in stale {
            let updated = self
                .transition(
                    &deploy.id,
                    DeployStatus::Unknown,
                    Some("NoProgress"),
                    Some("no condition reported since the deploy was created"),
                )
                .await?;
            marked.push(updated);
        }
        Ok(marked)
    }
}
