// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The flat process-spec read operation.

use std::sync::Arc;

use bkpaas_core::store::AppModelStore;
use bkpaas_model::{AppEnvName, ProcSpec};

use crate::error::Result;

/// Read-only view joining the overlay resolver and quota calculator into
/// flat per-process specs.
pub struct ProcSpecReader {
    store: Arc<AppModelStore>,
    max_replicas_cap: i32,
}

impl ProcSpecReader {
    /// Create a reader with the configured replica cap.
    pub fn new(store: Arc<AppModelStore>, max_replicas_cap: i32) -> Self {
        Self {
            store,
            max_replicas_cap,
        }
    }

    /// The effective process list of a module in one environment.
    pub async fn list(&self, module_id: &str, env: AppEnvName) -> Result<Vec<ProcSpec>> {
        let manifest = self.store.get_current_manifest(module_id).await?;
        Ok(bkpaas_model::procs::list_proc_specs(
            &manifest,
            env,
            self.max_replicas_cap,
        )?)
    }
}
