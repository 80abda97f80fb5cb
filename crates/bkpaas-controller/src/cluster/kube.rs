// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes-backed cluster client.
//!
//! Every object - the `BkApp` CR included - is addressed through the generic
//! [`DynamicObject`] API, so no compiled-in CRD schema is required and both
//! supported API versions can be served by one client.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, TypeMeta};
use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use bkpaas_core::persistence::EnvClusterRecord;
use bkpaas_model::manifest::GROUP;

use super::traits::{ClusterError, ResourceClient, ResourceKind, Result};

/// A cluster client backed by a kube [`Client`](kube::Client).
#[derive(Clone)]
pub struct KubeResourceClient {
    client: kube::Client,
}

impl KubeResourceClient {
    /// Wrap an existing kube client.
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Build a client from a cluster binding.
    ///
    /// `bearer_token` is the already-opened token of the binding; CA data, if
    /// present, is installed as the root certificate store.
    pub async fn connect(
        cluster: &EnvClusterRecord,
        bearer_token: Option<String>,
    ) -> Result<Self> {
        let cluster_url = cluster
            .api_server_url
            .parse()
            .map_err(|e| ClusterError::Config(format!("invalid API server URL: {}", e)))?;

        let mut config = kube::Config::new(cluster_url);
        config.default_namespace = cluster.namespace.clone();
        if let Some(token) = bearer_token {
            config.auth_info.token = Some(SecretString::from(token));
        }
        if let Some(ref ca_data) = cluster.ca_data {
            let pem = BASE64
                .decode(ca_data)
                .map_err(|e| ClusterError::Config(format!("invalid CA data: {}", e)))?;
            let pem = String::from_utf8(pem)
                .map_err(|_| ClusterError::Config("CA data is not UTF-8 PEM".to_string()))?;
            config.root_cert = Some(pem_to_der(&pem)?);
        }

        let client = kube::Client::try_from(config)
            .map_err(|e| ClusterError::Config(format!("failed to build client: {}", e)))?;

        debug!(cluster = %cluster.cluster_name, "cluster client created");
        Ok(Self { client })
    }

    fn api(&self, namespace: &str, kind: ResourceKind) -> Api<DynamicObject> {
        let resource = api_resource(kind);
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

/// The [`ApiResource`] of a managed kind.
fn api_resource(kind: ResourceKind) -> ApiResource {
    match kind {
        ResourceKind::BkApp(version) => ApiResource {
            group: GROUP.to_string(),
            version: version.version_tag().to_string(),
            api_version: version.as_str().to_string(),
            kind: "BkApp".to_string(),
            plural: "bkapps".to_string(),
        },
        ResourceKind::Secret => ApiResource::erase::<Secret>(&()),
        ResourceKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
        ResourceKind::PersistentVolumeClaim => ApiResource::erase::<PersistentVolumeClaim>(&()),
        ResourceKind::Service => ApiResource::erase::<Service>(&()),
        ResourceKind::Ingress => ApiResource::erase::<Ingress>(&()),
    }
}

/// Map a kube error onto the cluster error taxonomy.
fn map_kube_err(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) => ClusterError::Api {
            status: response.code,
            message: response.message,
        },
        other => ClusterError::Connection(other.to_string()),
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn apply_merge(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        body: &Value,
    ) -> Result<Value> {
        let resource = api_resource(kind);
        let api = self.api(namespace, kind);

        let exists = match api.get(name).await {
            Ok(_) => true,
            Err(kube::Error::Api(ref response)) if response.code == 404 => false,
            Err(err) => return Err(map_kube_err(err)),
        };

        let stored = if exists {
            api.patch(name, &PatchParams::default(), &Patch::Merge(body))
                .await
                .map_err(map_kube_err)?
        } else {
            let mut object: DynamicObject = serde_json::from_value(body.clone())?;
            // Bodies built from typed structs carry no apiVersion/kind, but
            // a create requires them.
            if object.types.is_none() {
                object.types = Some(TypeMeta {
                    api_version: resource.api_version.clone(),
                    kind: resource.kind.clone(),
                });
            }
            api.create(&PostParams::default(), &object)
                .await
                .map_err(map_kube_err)?
        };

        debug!(kind = kind.kind(), name = %name, namespace = %namespace, "object applied");
        Ok(serde_json::to_value(stored)?)
    }

    async fn get(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<Value>> {
        let api = self.api(namespace, kind);
        match api.get(name).await {
            Ok(object) => Ok(Some(serde_json::to_value(object)?)),
            Err(kube::Error::Api(ref response)) if response.code == 404 => Ok(None),
            Err(err) => Err(map_kube_err(err)),
        }
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<bool> {
        let api = self.api(namespace, kind);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ref response)) if response.code == 404 => Ok(false),
            Err(err) => Err(map_kube_err(err)),
        }
    }
}

/// Extract DER certificates from a PEM bundle.
fn pem_to_der(pem: &str) -> Result<Vec<Vec<u8>>> {
    let mut certs = Vec::new();
    let mut body: Option<String> = None;
    for line in pem.lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN CERTIFICATE") {
            body = Some(String::new());
        } else if line.starts_with("-----END CERTIFICATE") {
            if let Some(b64) = body.take() {
                let der = BASE64
                    .decode(b64)
                    .map_err(|e| ClusterError::Config(format!("invalid certificate: {}", e)))?;
                certs.push(der);
            }
        } else if let Some(ref mut b64) = body {
            b64.push_str(line);
        }
    }
    if certs.is_empty() {
        return Err(ClusterError::Config(
            "CA data contains no certificates".to_string(),
        ));
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bkpaas_model::ApiVersion;

    #[test]
    fn test_bkapp_api_resource() {
        let resource = api_resource(ResourceKind::BkApp(ApiVersion::V1Alpha2));
        assert_eq!(resource.group, "paas.bk.tencent.com");
        assert_eq!(resource.api_version, "paas.bk.tencent.com/v1alpha2");
        assert_eq!(resource.kind, "BkApp");
        assert_eq!(resource.plural, "bkapps");
    }

    #[test]
    fn test_builtin_api_resources() {
        assert_eq!(api_resource(ResourceKind::Secret).kind, "Secret");
        assert_eq!(api_resource(ResourceKind::Service).api_version, "v1");
        assert_eq!(
            api_resource(ResourceKind::Ingress).api_version,
            "networking.k8s.io/v1"
        );
    }

    #[test]
    fn test_pem_to_der() {
        // "certdata" base64-encoded inside a PEM envelope.
        let pem = "-----BEGIN CERTIFICATE-----\nY2VydGRhdGE=\n-----END CERTIFICATE-----\n";
        let certs = pem_to_der(pem).unwrap();
        assert_eq!(certs, vec![b"certdata".to_vec()]);

        assert!(pem_to_der("not a pem").is_err());
    }
}
