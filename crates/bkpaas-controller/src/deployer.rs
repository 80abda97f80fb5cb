// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The deploy pipeline.
//!
//! A deploy is one attempt to apply a revision to an environment. Deploys
//! for different (application, module, environment) triples run in parallel;
//! a single triple is serialised through a per-triple lock obtained before
//! the reconciler runs and released when the deploy reaches a terminal state
//! or times out. Operations inside one deploy are sequenced; cancellation is
//! cooperative via a token carried through all I/O.
//!
//! Already-applied CR changes are never rolled back on cancellation or
//! failure - Kubernetes is the source of truth for cluster state.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use bkpaas_core::config::Config;
use bkpaas_core::credentials::CredentialRef;
use bkpaas_core::error::CoreError;
use bkpaas_core::persistence::{DeployRecord, ListDeploysFilter, RevisionRecord};
use bkpaas_core::store::{AppModelStore, ModuleRef};
use bkpaas_core::tracker::{DeployStatus, DeployStatusView, DeployTracker};
use bkpaas_model::AppEnvName;
use bkpaas_model::manifest::BkAppManifest;

use crate::error::{ControllerError, Result};
use crate::reconciler::Reconciler;

/// Per-(application, module, environment) lock registry.
///
/// The deploy pipeline `try`-acquires (a held lock is a caller error);
/// replica and autoscaling patches `acquire` and thereby queue behind an
/// in-flight deploy.
#[derive(Default)]
pub struct DeployLocks {
    inner: DashMap<String, Arc<Mutex<()>>>,
}

impl DeployLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, module: &ModuleRef, env: AppEnvName) -> Arc<Mutex<()>> {
        let key = format!(
            "{}:{}:{}",
            module.application_id, module.module_id, env
        );
        self.inner
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for the triple's lock.
    pub async fn acquire(&self, module: &ModuleRef, env: AppEnvName) -> OwnedMutexGuard<()> {
        self.handle(module, env).lock_owned().await
    }

    /// Take the triple's lock without waiting, `None` when a deploy holds it.
    pub fn try_acquire(&self, module: &ModuleRef, env: AppEnvName) -> Option<OwnedMutexGuard<()>> {
        self.handle(module, env).try_lock_owned().ok()
    }
}

/// A deploy request.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Module being deployed.
    pub module: ModuleRef,
    /// Target environment.
    pub environment: AppEnvName,
    /// Manifest to bind as a new revision; the current revision deploys when
    /// absent.
    pub manifest: Option<Value>,
    /// Who triggered the deploy.
    pub operator: String,
    /// Caller-chosen deploy name; generated from the revision when absent.
    pub name: Option<String>,
}

/// Orchestrates the deploy pipeline.
pub struct Deployer {
    store: Arc<AppModelStore>,
    tracker: Arc<DeployTracker>,
    reconciler: Arc<Reconciler>,
    locks: Arc<DeployLocks>,
    deploy_timeout: Duration,
}

impl Deployer {
    /// Create a deployer.
    pub fn new(
        store: Arc<AppModelStore>,
        tracker: Arc<DeployTracker>,
        reconciler: Arc<Reconciler>,
        locks: Arc<DeployLocks>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            tracker,
            reconciler,
            locks,
            deploy_timeout: Duration::from_secs(config.deploy_timeout_seconds),
        }
    }

    /// Deploy with a fresh (never cancelled) token.
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployRecord> {
        self.deploy_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run the deploy pipeline.
    ///
    /// Returns the Deploy row: `PROGRESSING` when the manifest applied and
    /// the external watcher now owns the path to `READY`, or terminal
    /// `ERROR` with the failure kind as reason. A second deploy for the same
    /// triple while one is in flight fails with `DeployLockHeld`.
    #[instrument(skip(self, request, cancel), fields(app = %request.module.app_code, env = %request.environment))]
    pub async fn deploy_with_cancel(
        &self,
        request: DeployRequest,
        cancel: CancellationToken,
    ) -> Result<DeployRecord> {
        let DeployRequest {
            module,
            environment,
            manifest,
            operator,
            name,
        } = request;

        let guard = self.locks.try_acquire(&module, environment).ok_or_else(|| {
            CoreError::DeployLockHeld {
                module_id: module.module_id.clone(),
                environment: environment.as_str().to_string(),
            }
        })?;

        // Pin the revision before reconciliation starts; a newer revision
        // bound mid-deploy is never observed by this deploy.
        let revision = match manifest {
            Some(ref value) => self.store.create_from_manifest(&module, value).await?,
            None => self.store.get_current(&module.module_id).await?,
        };

        let name = name.unwrap_or_else(|| format!("deploy-{}", &revision.id[..8]));
        let deploy = self
            .tracker
            .create(&module, environment.as_str(), &name, &revision.id, &operator)
            .await?;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ControllerError::Cancelled),
            reconciled = tokio::time::timeout(
                self.deploy_timeout,
                self.reconcile(&deploy.id, &module, environment, &revision),
            ) => match reconciled {
                Ok(inner) => inner,
                Err(_) => Err(ControllerError::Timeout(self.deploy_timeout.as_secs())),
            },
        };

        match outcome {
            Ok(()) => {
                // The watcher drives PROGRESSING to READY; hold the lock
                // until then (or until the budget runs out).
                self.release_on_terminal(guard, deploy.id.clone());
                Ok(self.tracker.get(&deploy.id).await?)
            }
            Err(err) => {
                warn!(error = %err, reason = err.kind(), "deploy failed");
                let record = self
                    .tracker
                    .transition(
                        &deploy.id,
                        DeployStatus::Error,
                        Some(err.kind()),
                        Some(&err.to_string()),
                    )
                    .await?;
                drop(guard);
                Ok(record)
            }
        }
    }

    /// The sequenced reconcile steps of one deploy.
    async fn reconcile(
        &self,
        deploy_id: &str,
        module: &ModuleRef,
        env: AppEnvName,
        revision: &RevisionRecord,
    ) -> Result<()> {
        self.tracker
            .transition(deploy_id, DeployStatus::Progressing, None, None)
            .await?;

        let manifest_value: Value =
            serde_json::from_str(&revision.manifest_json).map_err(CoreError::from)?;
        let manifest = self.store.renderer().parse_lenient(&manifest_value)?;

        let references = credential_refs(&manifest);
        self.reconciler
            .sync_credentials(module, env, &references)
            .await?;
        self.reconciler.materialise_mounts(module, env).await?;
        self.reconciler.apply_manifest(module, env, &manifest).await?;

        self.store
            .mark_deployed(&revision.id, &revision.manifest_json)
            .await?;

        info!(deploy_id = %deploy_id, "reconciliation complete, watcher owns the deploy now");
        Ok(())
    }

    /// Hold the lock until the deploy ends, then release it. If the budget
    /// runs out first, the deploy is expired with reason `Timeout`.
    fn release_on_terminal(&self, guard: OwnedMutexGuard<()>, deploy_id: String) {
        let mut events = self.tracker.subscribe();
        let tracker = self.tracker.clone();
        let budget = self.deploy_timeout;

        tokio::spawn(async move {
            let _guard = guard;
            let deadline = tokio::time::sleep(budget);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        let _ = tracker
                            .transition(
                                &deploy_id,
                                DeployStatus::Error,
                                Some("Timeout"),
                                Some("deploy exceeded its wall-clock budget"),
                            )
                            .await;
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(end) if end.deploy_id == deploy_id => break,
                        Ok(_) => continue,
                        // Lagged or closed channel: the watchdog sweep is
                        // the fallback, release the lock.
                        Err(_) => break,
                    },
                }
            }
        });
    }

    /// Deploys of a module in one environment, newest first.
    pub async fn list_deploys(
        &self,
        module_id: &str,
        env: AppEnvName,
    ) -> Result<Vec<DeployRecord>> {
        let filter = ListDeploysFilter {
            environment: Some(env.as_str().to_string()),
            ..Default::default()
        };
        Ok(self.tracker.list(module_id, &filter).await?)
    }

    /// The caller-facing status of a deploy.
    pub async fn get_deploy_status(&self, deploy_id: &str) -> Result<DeployStatusView> {
        Ok(self.tracker.get_status(deploy_id).await?)
    }
}

/// Derive the credential references of a manifest: one per distinct image,
/// using the build section's credential name.
fn credential_refs(manifest: &BkAppManifest) -> Vec<CredentialRef> {
    let Some(credential_name) = manifest
        .spec
        .build
        .as_ref()
        .and_then(|b| b.image_credentials_name.clone())
    else {
        return Vec::new();
    };

    let mut images: Vec<String> = Vec::new();
    if let Some(image) = manifest.spec.build.as_ref().and_then(|b| b.image.clone()) {
        images.push(image);
    }
    for process in &manifest.spec.processes {
        if let Some(ref image) = process.image
            && !images.contains(image)
        {
            images.push(image.clone());
        }
    }

    images
        .into_iter()
        .map(|image| CredentialRef {
            credential_name: credential_name.clone(),
            image,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credential_refs_require_a_build_credential() {
        let manifest: BkAppManifest = serde_json::from_value(json!({
            "apiVersion": "paas.bk.tencent.com/v1alpha2",
            "kind": "BkApp",
            "metadata": {"name": "demo"},
            "spec": {"processes": [{"name": "web", "image": "a.io/img1"}]}
        }))
        .unwrap();
        assert!(credential_refs(&manifest).is_empty());
    }

    #[test]
    fn test_credential_refs_deduplicate_images() {
        let manifest: BkAppManifest = serde_json::from_value(json!({
            "apiVersion": "paas.bk.tencent.com/v1alpha2",
            "kind": "BkApp",
            "metadata": {"name": "demo"},
            "spec": {
                "build": {"image": "a.io/base", "imageCredentialsName": "c1"},
                "processes": [
                    {"name": "web", "image": "a.io/img1"},
                    {"name": "worker", "image": "a.io/img1"}
                ]
            }
        }))
        .unwrap();
        let refs = credential_refs(&manifest);
        let images: Vec<&str> = refs.iter().map(|r| r.image.as_str()).collect();
        assert_eq!(images, vec!["a.io/base", "a.io/img1"]);
        assert!(refs.iter().all(|r| r.credential_name == "c1"));
    }
}
