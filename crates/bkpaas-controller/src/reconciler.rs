// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The Kubernetes reconciler.
//!
//! Drives one environment's cluster toward an AppModel revision: the `BkApp`
//! CR itself, derived `Service`/`Ingress` objects for HTTP-exposing
//! processes, the image-pull credential `Secret`, and `ConfigMap`/PVC
//! materialisation for mounts.
//!
//! Transient API errors (HTTP 5xx, connection resets) are retried with
//! exponential backoff inside this module; 4xx and validation errors surface
//! immediately. Partial progress is never reported as success: if any
//! derived resource fails to apply, the whole operation fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaim, PersistentVolumeClaimSpec, Secret, Service, ServicePort,
    ServiceSpec, VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    Ingress, IngressBackend, IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use bkpaas_core::config::Config;
use bkpaas_core::credentials::{CredentialRef, CredentialStore};
use bkpaas_core::error::CoreError;
use bkpaas_core::mounts::{MountManager, ResolvedMountSource};
use bkpaas_core::persistence::{EnvClusterRecord, Persistence};
use bkpaas_core::store::ModuleRef;
use bkpaas_model::manifest::BkAppManifest;
use bkpaas_model::{AppEnvName, Renderer};

use crate::cluster::{ClientCache, ClusterError, ResourceClient, ResourceKind};
use crate::error::{ControllerError, Result};

/// Label carrying the process name on derived objects.
const PROCESS_LABEL: &str = "bkapp.paas.bk.tencent.com/process-name";

/// Label carrying the application code on derived objects.
const APP_LABEL: &str = "app.kubernetes.io/name";

/// Exponential backoff policy for transient cluster errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retries after the first attempt.
    pub budget: u32,
    /// First delay in milliseconds.
    pub base_ms: u64,
    /// Multiplication factor per retry.
    pub factor: f64,
}

impl RetryPolicy {
    /// Derive the policy from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            budget: config.retry_budget,
            base_ms: config.retry_base_ms,
            factor: config.retry_factor,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let millis = self.base_ms as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(millis as u64)
    }
}

/// Reconciles AppModel state against target clusters.
pub struct Reconciler {
    persistence: Arc<dyn Persistence>,
    credentials: Arc<CredentialStore>,
    mounts: Arc<MountManager>,
    clients: Arc<ClientCache>,
    renderer: Renderer,
    retry: RetryPolicy,
    storage_class_name: Option<String>,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        credentials: Arc<CredentialStore>,
        mounts: Arc<MountManager>,
        clients: Arc<ClientCache>,
        config: &Config,
    ) -> Self {
        Self {
            persistence,
            credentials,
            mounts,
            clients,
            renderer: Renderer::new(config.api_version),
            retry: RetryPolicy::from_config(config),
            storage_class_name: config.storage_class_name.clone(),
        }
    }

    /// The cluster binding and a checked-out client for one environment.
    async fn env_client(
        &self,
        module: &ModuleRef,
        env: AppEnvName,
    ) -> Result<(EnvClusterRecord, Arc<dyn ResourceClient>)> {
        let cluster = self
            .persistence
            .get_env_cluster(&module.application_id, env.as_str())
            .await?
            .ok_or_else(|| {
                CoreError::not_found("cluster binding", format!("{}/{}", module.app_code, env))
            })?;

        let token = match cluster.token_encrypted {
            Some(ref sealed) => Some(self.credentials.reveal(sealed)?),
            None => None,
        };
        let client = self.clients.get_or_connect(&cluster, token).await?;
        Ok((cluster, client))
    }

    /// Run a cluster call under the retry policy.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, ClusterError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry.budget => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        operation = %operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient cluster error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Create or merge-patch the `BkApp` CR and its derived objects.
    ///
    /// Derived `Service`/`Ingress` objects for HTTP-exposing processes are
    /// applied in parallel after the CR; any failure fails the whole
    /// operation with `PartialApplyFailed` semantics.
    #[instrument(skip(self, module, manifest), fields(app = %module.app_code, env = %env))]
    pub async fn apply_manifest(
        &self,
        module: &ModuleRef,
        env: AppEnvName,
        manifest: &BkAppManifest,
    ) -> Result<Value> {
        let (cluster, client) = self.env_client(module, env).await?;
        let deployable = self.renderer.to_deployable(manifest)?;
        let bkapp_kind = ResourceKind::BkApp(self.renderer.emit_version());

        let stored = self
            .with_retry("apply BkApp", || {
                client.apply_merge(&cluster.namespace, bkapp_kind, &module.app_code, &deployable)
            })
            .await?;

        // Derived objects fan out in parallel; the first failure wins.
        let exposed: Vec<_> = manifest
            .spec
            .processes
            .iter()
            .filter(|p| p.target_port.is_some())
            .collect();

        let mut applies = Vec::new();
        for process in &exposed {
            let port = process.target_port.unwrap_or_default();
            let body = service_body(&module.app_code, &process.name, port)?;
            let name = service_name(&module.app_code, &process.name);
            applies.push((ResourceKind::Service, name, body));
        }
        if let Some(first) = exposed.first() {
            let body = ingress_body(&module.app_code, &first.name)?;
            applies.push((ResourceKind::Ingress, module.app_code.clone(), body));
        }

        let results = join_all(applies.iter().map(|(kind, name, body)| {
            let client = client.clone();
            let namespace = cluster.namespace.clone();
            async move {
                self.with_retry("apply derived object", || {
                    client.apply_merge(&namespace, *kind, name, body)
                })
                .await
                .map_err(|err| (kind.kind(), name.clone(), err))
            }
        }))
        .await;

        for result in results {
            if let Err((kind, name, err)) = result {
                warn!(kind = kind, name = %name, error = %err, "derived resource failed to apply");
                return Err(ControllerError::PartialApply {
                    failed: format!("{} '{}': {}", kind, name, err),
                });
            }
        }

        info!(services = exposed.len(), "manifest applied");
        Ok(stored)
    }

    /// The manifest currently deployed in an environment, verbatim.
    ///
    /// Server-added fields are preserved; callers that need the typed form
    /// parse leniently.
    #[instrument(skip(self, module), fields(app = %module.app_code, env = %env))]
    pub async fn get_manifest(&self, module: &ModuleRef, env: AppEnvName) -> Result<Value> {
        let (cluster, client) = self.env_client(module, env).await?;
        let bkapp_kind = ResourceKind::BkApp(self.renderer.emit_version());

        let stored = self
            .with_retry("get BkApp", || {
                client.get(&cluster.namespace, bkapp_kind, &module.app_code)
            })
            .await?;

        stored.ok_or_else(|| ControllerError::NotDeployed(env.as_str().to_string()))
    }

    /// Merge-patch the deployed `BkApp` CR.
    pub async fn patch_manifest(
        &self,
        module: &ModuleRef,
        env: AppEnvName,
        patch: &Value,
    ) -> Result<Value> {
        let (cluster, client) = self.env_client(module, env).await?;
        let bkapp_kind = ResourceKind::BkApp(self.renderer.emit_version());
        self.with_retry("patch BkApp", || {
            client.apply_merge(&cluster.namespace, bkapp_kind, &module.app_code, patch)
        })
        .await
    }

    /// Synchronise image-pull credentials for one environment.
    ///
    /// Projects the referenced credential pairs into the per-workload rows
    /// (pruning unreferenced ones) and applies the dockerconfigjson `Secret`
    /// so the cluster-side set is exactly the referenced set.
    #[instrument(skip(self, module, references), fields(app = %module.app_code, env = %env, count = references.len()))]
    pub async fn sync_credentials(
        &self,
        module: &ModuleRef,
        env: AppEnvName,
        references: &[CredentialRef],
    ) -> Result<()> {
        let rows = self
            .credentials
            .sync_image_credentials(
                &module.application_id,
                &module.tenant_id,
                &module.wl_app_id(env.as_str()),
                references,
            )
            .await?;

        let mut auths = serde_json::Map::new();
        for row in &rows {
            let password = self.credentials.reveal(&row.password_encrypted)?;
            let auth = BASE64.encode(format!("{}:{}", row.username, password));
            auths.insert(
                registry_host(&row.registry).to_string(),
                json!({
                    "username": row.username,
                    "password": password,
                    "auth": auth,
                }),
            );
        }
        let dockerconfig = Value::Object(
            [("auths".to_string(), Value::Object(auths))]
                .into_iter()
                .collect(),
        );

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name(&module.app_code)),
                labels: Some(BTreeMap::from([(
                    APP_LABEL.to_string(),
                    module.app_code.clone(),
                )])),
                ..Default::default()
            },
            type_: Some("kubernetes.io/dockerconfigjson".to_string()),
            string_data: Some(BTreeMap::from([(
                ".dockerconfigjson".to_string(),
                dockerconfig.to_string(),
            )])),
            ..Default::default()
        };
        let body = serde_json::to_value(&secret).map_err(ClusterError::from)?;

        let (cluster, client) = self.env_client(module, env).await?;
        let name = secret_name(&module.app_code);
        self.with_retry("apply credential secret", || {
            client.apply_merge(
                &cluster.namespace,
                ResourceKind::Secret,
                &name,
                &body,
            )
        })
        .await?;

        info!(images = rows.len(), "image credentials synced");
        Ok(())
    }

    /// Materialise every mount source of an environment.
    ///
    /// ConfigMap sources become `ConfigMap` objects, PersistentStorage
    /// sources become `PersistentVolumeClaim`s, named after the source. A
    /// mount whose source row is missing fails the deploy.
    #[instrument(skip(self, module), fields(app = %module.app_code, env = %env))]
    pub async fn materialise_mounts(&self, module: &ModuleRef, env: AppEnvName) -> Result<()> {
        let mounts = self.mounts.list_effective(&module.module_id, env).await?;
        if mounts.is_empty() {
            return Ok(());
        }

        let (cluster, client) = self.env_client(module, env).await?;
        for mount in &mounts {
            let source = self
                .mounts
                .resolve_source(&module.application_id, env, mount)
                .await?;
            let (kind, name, body) = match source {
                ResolvedMountSource::ConfigMap(source) => {
                    let data: BTreeMap<String, String> = serde_json::from_str(&source.data)
                        .map_err(|e| {
                            CoreError::validation("data", format!("invalid source data: {}", e))
                        })?;
                    let config_map = ConfigMap {
                        metadata: ObjectMeta {
                            name: Some(source.name.clone()),
                            labels: Some(BTreeMap::from([(
                                APP_LABEL.to_string(),
                                module.app_code.clone(),
                            )])),
                            ..Default::default()
                        },
                        data: Some(data),
                        ..Default::default()
                    };
                    (
                        ResourceKind::ConfigMap,
                        source.name.clone(),
                        serde_json::to_value(&config_map).map_err(ClusterError::from)?,
                    )
                }
                ResolvedMountSource::PersistentStorage(source) => {
                    let storage_class = source
                        .storage_class
                        .clone()
                        .or_else(|| self.storage_class_name.clone());
                    let claim = PersistentVolumeClaim {
                        metadata: ObjectMeta {
                            name: Some(source.name.clone()),
                            labels: Some(BTreeMap::from([(
                                APP_LABEL.to_string(),
                                module.app_code.clone(),
                            )])),
                            ..Default::default()
                        },
                        spec: Some(PersistentVolumeClaimSpec {
                            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                            storage_class_name: storage_class,
                            resources: Some(VolumeResourceRequirements {
                                requests: Some(BTreeMap::from([(
                                    "storage".to_string(),
                                    Quantity(source.storage_size.clone()),
                                )])),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    };
                    (
                        ResourceKind::PersistentVolumeClaim,
                        source.name.clone(),
                        serde_json::to_value(&claim).map_err(ClusterError::from)?,
                    )
                }
            };

            self.with_retry("apply mount source", || {
                client.apply_merge(&cluster.namespace, kind, &name, &body)
            })
            .await?;
        }

        info!(mounts = mounts.len(), "mount sources materialised");
        Ok(())
    }

    /// Remove the environment's objects from the cluster.
    ///
    /// Part of module deletion: the `BkApp` CR, derived Service/Ingress
    /// objects and the credential Secret are deleted; mount sources stay, as
    /// other modules of the application may share them.
    #[instrument(skip(self, module, manifest), fields(app = %module.app_code, env = %env))]
    pub async fn delete_app(
        &self,
        module: &ModuleRef,
        env: AppEnvName,
        manifest: &BkAppManifest,
    ) -> Result<()> {
        let (cluster, client) = self.env_client(module, env).await?;
        let bkapp_kind = ResourceKind::BkApp(self.renderer.emit_version());

        self.with_retry("delete BkApp", || {
            client.delete(&cluster.namespace, bkapp_kind, &module.app_code)
        })
        .await?;

        for process in &manifest.spec.processes {
            if process.target_port.is_none() {
                continue;
            }
            let name = service_name(&module.app_code, &process.name);
            self.with_retry("delete derived Service", || {
                client.delete(&cluster.namespace, ResourceKind::Service, &name)
            })
            .await?;
        }
        self.with_retry("delete Ingress", || {
            client.delete(&cluster.namespace, ResourceKind::Ingress, &module.app_code)
        })
        .await?;
        let secret = secret_name(&module.app_code);
        self.with_retry("delete credential secret", || {
            client.delete(
                &cluster.namespace,
                ResourceKind::Secret,
                &secret,
            )
        })
        .await?;

        info!("environment objects deleted");
        Ok(())
    }

    /// Evict a cluster's cached client after its credentials rotated.
    pub fn evict_cluster_client(&self, cluster_name: &str) {
        self.clients.evict(cluster_name);
    }

    /// The renderer used for deployable output.
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }
}

/// Name of the derived Service of one process.
pub fn service_name(app_code: &str, process: &str) -> String {
    format!("{}--{}", app_code, process)
}

/// Name of the application's dockerconfigjson Secret.
pub fn secret_name(app_code: &str) -> String {
    format!("{}--dockerconfigjson", app_code)
}

/// Registry host of an image reference (`a.io/img` -> `a.io`).
fn registry_host(image: &str) -> &str {
    image.split('/').next().unwrap_or(image)
}

fn service_body(app_code: &str, process: &str, target_port: i32) -> Result<Value> {
    let service = Service {
        metadata: ObjectMeta {
            name: Some(service_name(app_code, process)),
            labels: Some(BTreeMap::from([
                (APP_LABEL.to_string(), app_code.to_string()),
                (PROCESS_LABEL.to_string(), process.to_string()),
            ])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([
                (APP_LABEL.to_string(), app_code.to_string()),
                (PROCESS_LABEL.to_string(), process.to_string()),
            ])),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: 80,
                target_port: Some(IntOrString::Int(target_port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    Ok(serde_json::to_value(&service).map_err(ClusterError::from)?)
}

fn ingress_body(app_code: &str, process: &str) -> Result<Value> {
    let ingress = Ingress {
        metadata: ObjectMeta {
            name: Some(app_code.to_string()),
            labels: Some(BTreeMap::from([(
                APP_LABEL.to_string(),
                app_code.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            default_backend: Some(IngressBackend {
                service: Some(IngressServiceBackend {
                    name: service_name(app_code, process),
                    port: Some(ServiceBackendPort {
                        number: Some(80),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    Ok(serde_json::to_value(&ingress).map_err(ClusterError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            budget: 3,
            base_ms: 500,
            factor: 2.0,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("a.io/img1"), "a.io");
        assert_eq!(registry_host("registry.example.com:5000/ns/img"), "registry.example.com:5000");
        assert_eq!(registry_host("busybox"), "busybox");
    }

    #[test]
    fn test_derived_names() {
        assert_eq!(service_name("demo-app", "web"), "demo-app--web");
        assert_eq!(secret_name("demo-app"), "demo-app--dockerconfigjson");
    }

    #[test]
    fn test_service_body_shape() {
        let body = service_body("demo-app", "web", 5000).unwrap();
        assert_eq!(body["metadata"]["name"], "demo-app--web");
        assert_eq!(body["spec"]["ports"][0]["targetPort"], 5000);
        assert_eq!(
            body["spec"]["selector"][PROCESS_LABEL],
            "web"
        );
    }

    #[test]
    fn test_ingress_body_shape() {
        let body = ingress_body("demo-app", "web").unwrap();
        assert_eq!(
            body["spec"]["defaultBackend"]["service"]["name"],
            "demo-app--web"
        );
    }
}
