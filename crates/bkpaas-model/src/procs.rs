// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flat per-process view for external readers.
//!
//! A pure join of the overlay resolver and the quota calculator; no other
//! source of truth contributes.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::manifest::{AppEnvName, BkAppManifest};
use crate::overlay::OverlayResolver;
use crate::quota;

/// Whether a process should be running at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetStatus {
    /// Target replicas above zero.
    Start,
    /// Target replicas is zero.
    Stop,
}

/// Effective runtime shape of one process in one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcSpec {
    /// Process name.
    pub name: String,
    /// Effective replica count.
    pub target_replicas: i32,
    /// START when `target_replicas > 0`, STOP otherwise.
    pub target_status: TargetStatus,
    /// CPU limit quantity, e.g. `4000m`.
    pub cpu_limit: String,
    /// Memory limit quantity, e.g. `1024Mi`.
    pub memory_limit: String,
    /// Whether autoscaling is enabled for the process.
    pub autoscaling: bool,
    /// Upper replica bound, clamped at the configured cap.
    pub max_replicas: i32,
}

/// Build the flat process list for one environment.
///
/// `max_replicas_cap` is the cluster-configured replica cap
/// (`default_max_replicas`).
pub fn list_proc_specs(
    manifest: &BkAppManifest,
    env: AppEnvName,
    max_replicas_cap: i32,
) -> Result<Vec<ProcSpec>> {
    let resolver = OverlayResolver::new(manifest);
    let mut specs = Vec::with_capacity(manifest.spec.processes.len());

    for process in &manifest.spec.processes {
        let target_replicas = resolver.replicas(env, &process.name)?;
        let plan = quota::parse(&resolver.quota_plan(env, &process.name)?)?;
        let autoscaling = resolver.autoscaling(env, &process.name)?;

        let max_replicas = autoscaling
            .as_ref()
            .map(|a| a.max_replicas)
            .unwrap_or(target_replicas)
            .min(max_replicas_cap);

        specs.push(ProcSpec {
            name: process.name.clone(),
            target_replicas,
            target_status: if target_replicas > 0 {
                TargetStatus::Start
            } else {
                TargetStatus::Stop
            },
            cpu_limit: plan.limits.cpu(),
            memory_limit: plan.limits.memory(),
            autoscaling: autoscaling.is_some(),
            max_replicas,
        });
    }

    Ok(specs)
}
