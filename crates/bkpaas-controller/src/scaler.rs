// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replica and autoscaling operations.
//!
//! All four operations are envOverlay patches: the full overlay array is
//! read, modified and written back, both to the AppModel store (a new
//! revision) and - when the environment is deployed - to the `BkApp` CR as
//! an RFC 7396 merge patch replacing the whole array. Issuing the same call
//! twice yields the same CR.
//!
//! Calls go through the per-(application, module, environment) deploy lock,
//! so patches issued while a deploy is in flight queue up and apply after
//! the deploy reaches a terminal state.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, instrument};

use bkpaas_core::error::CoreError;
use bkpaas_core::store::{AppModelStore, ModuleRef};
use bkpaas_model::manifest::{
    AutoscalingConfig, AutoscalingOverlay, BkAppManifest, ReplicasOverlay, validate_autoscaling,
};
use bkpaas_model::{AppEnvName, OverlayResolver};

use crate::deployer::DeployLocks;
use crate::error::{ControllerError, Result};
use crate::reconciler::Reconciler;

/// Replica and autoscaling controller.
pub struct Scaler {
    store: Arc<AppModelStore>,
    reconciler: Arc<Reconciler>,
    locks: Arc<DeployLocks>,
    max_replicas_cap: i32,
}

impl Scaler {
    /// Create a scaler.
    pub fn new(
        store: Arc<AppModelStore>,
        reconciler: Arc<Reconciler>,
        locks: Arc<DeployLocks>,
        max_replicas_cap: i32,
    ) -> Self {
        Self {
            store,
            reconciler,
            locks,
            max_replicas_cap,
        }
    }

    /// Effective replica count of `(env, process)`.
    pub async fn get_replicas(
        &self,
        module: &ModuleRef,
        env: AppEnvName,
        process: &str,
    ) -> Result<i32> {
        let manifest = self.store.get_current_manifest(&module.module_id).await?;
        Ok(OverlayResolver::new(&manifest).replicas(env, process)?)
    }

    /// Upsert the replica overlay of `(env, process)`.
    ///
    /// Requires `count >= 0` and a declared process. The whole replicas
    /// array is replaced on the CR.
    #[instrument(skip(self, module), fields(app = %module.app_code, env = %env, process = %process, count))]
    pub async fn set_replicas(
        &self,
        module: &ModuleRef,
        env: AppEnvName,
        process: &str,
        count: i32,
    ) -> Result<()> {
        if count < 0 {
            return Err(CoreError::validation(
                "count",
                "replica count must not be negative",
            )
            .into());
        }

        // Queue behind any in-flight deploy of the same triple.
        let _guard = self.locks.acquire(module, env).await;

        let mut manifest = self.store.get_current_manifest(&module.module_id).await?;
        ensure_process(&manifest, process)?;

        let overlay = manifest.spec.env_overlay.get_or_insert_with(Default::default);
        overlay
            .replicas
            .retain(|e| !(e.env_name == env && e.process == process));
        overlay.replicas.push(ReplicasOverlay {
            env_name: env,
            process: process.to_string(),
            count,
        });
        let replicas_array = serde_json::to_value(&overlay.replicas)
            .map_err(CoreError::from)?;

        self.store.use_revision(module, &manifest).await?;
        self.patch_overlay(module, env, "replicas", replicas_array)
            .await?;

        info!("replica overlay updated");
        Ok(())
    }

    /// Effective autoscaling configuration of `(env, process)`.
    pub async fn get_autoscaling(
        &self,
        module: &ModuleRef,
        env: AppEnvName,
        process: &str,
    ) -> Result<Option<AutoscalingConfig>> {
        let manifest = self.store.get_current_manifest(&module.module_id).await?;
        Ok(OverlayResolver::new(&manifest).autoscaling(env, process)?)
    }

    /// Enable or disable the autoscaling overlay of `(env, process)`.
    ///
    /// Disabling removes every autoscaling overlay entry of the pair;
    /// enabling upserts one. Bounds: `minReplicas >= 1`,
    /// `maxReplicas >= minReplicas`, `maxReplicas` at most the configured
    /// cap.
    #[instrument(skip(self, module, config), fields(app = %module.app_code, env = %env, process = %process, enabled))]
    pub async fn set_autoscaling(
        &self,
        module: &ModuleRef,
        env: AppEnvName,
        process: &str,
        enabled: bool,
        config: Option<AutoscalingConfig>,
    ) -> Result<()> {
        let config = match (enabled, config) {
            (true, Some(config)) => {
                validate_autoscaling(config.min_replicas, config.max_replicas, "autoscaling")?;
                if config.max_replicas > self.max_replicas_cap {
                    return Err(CoreError::validation(
                        "autoscaling.maxReplicas",
                        format!("must not exceed the configured cap of {}", self.max_replicas_cap),
                    )
                    .into());
                }
                Some(config)
            }
            (true, None) => {
                return Err(CoreError::validation(
                    "autoscaling",
                    "a configuration is required when enabling autoscaling",
                )
                .into());
            }
            (false, _) => None,
        };

        let _guard = self.locks.acquire(module, env).await;

        let mut manifest = self.store.get_current_manifest(&module.module_id).await?;
        ensure_process(&manifest, process)?;

        let overlay = manifest.spec.env_overlay.get_or_insert_with(Default::default);
        overlay
            .autoscaling
            .retain(|e| !(e.env_name == env && e.process == process));
        if let Some(config) = config {
            overlay.autoscaling.push(AutoscalingOverlay {
                env_name: env,
                process: process.to_string(),
                min_replicas: config.min_replicas,
                max_replicas: config.max_replicas,
                policy: config.policy,
            });
        }
        let autoscaling_array = serde_json::to_value(&overlay.autoscaling)
            .map_err(CoreError::from)?;

        self.store.use_revision(module, &manifest).await?;
        self.patch_overlay(module, env, "autoscaling", autoscaling_array)
            .await?;

        info!("autoscaling overlay updated");
        Ok(())
    }

    /// Replace one overlay array on the deployed CR.
    ///
    /// Strategic merge patch is unavailable on CRDs, so the array is
    /// replaced wholesale via JSON merge patch. An environment that has
    /// never been deployed has no CR to patch; the overlay reaches the
    /// cluster with the next deploy.
    async fn patch_overlay(
        &self,
        module: &ModuleRef,
        env: AppEnvName,
        attribute: &str,
        array: Value,
    ) -> Result<()> {
        match self.reconciler.get_manifest(module, env).await {
            Ok(_) => {
                let patch = json!({"spec": {"envOverlay": {attribute: array}}});
                self.reconciler.patch_manifest(module, env, &patch).await?;
                Ok(())
            }
            Err(ControllerError::NotDeployed(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn ensure_process(manifest: &BkAppManifest, process: &str) -> Result<()> {
    if manifest.has_process(process) {
        Ok(())
    } else {
        Err(CoreError::not_found("process", process).into())
    }
}
