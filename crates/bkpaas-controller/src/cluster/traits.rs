// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster client trait definitions.
//!
//! Defines the abstract interface for cluster resource access. Strategic
//! merge patch is unavailable on CRDs, so the only write primitive is
//! create-or-RFC-7396-merge.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use bkpaas_model::ApiVersion;

/// Errors from cluster operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The API server answered with an error status.
    #[error("Kubernetes API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Server-provided message.
        message: String,
    },

    /// The API server could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The cluster binding has no usable configuration.
    #[error("cluster configuration error: {0}")]
    Config(String),

    /// Payload serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClusterError {
    /// Whether the reconciler's retry loop should retry this error.
    ///
    /// HTTP 5xx and connection failures are transient; 4xx and local errors
    /// surface immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status >= 500,
            Self::Connection(_) => true,
            Self::Config(_) | Self::Serialization(_) => false,
        }
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Kinds of objects the reconciler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// The `BkApp` custom resource at one of its API versions.
    BkApp(ApiVersion),
    /// `v1` Secret.
    Secret,
    /// `v1` ConfigMap.
    ConfigMap,
    /// `v1` PersistentVolumeClaim.
    PersistentVolumeClaim,
    /// `v1` Service.
    Service,
    /// `networking.k8s.io/v1` Ingress.
    Ingress,
}

impl ResourceKind {
    /// Kind name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BkApp(_) => "BkApp",
            Self::Secret => "Secret",
            Self::ConfigMap => "ConfigMap",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
        }
    }
}

/// Narrow cluster interface used by the reconciler.
///
/// A client is checked out per logical operation; implementations are safe
/// to share across tasks.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Create the object, or apply an RFC 7396 JSON merge patch when it
    /// already exists. Returns the object as stored by the cluster.
    async fn apply_merge(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        body: &Value,
    ) -> Result<Value>;

    /// Read an object, `None` when absent.
    async fn get(&self, namespace: &str, kind: ResourceKind, name: &str)
    -> Result<Option<Value>>;

    /// Delete an object. Returns false when it was already absent.
    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<bool>;
}

/// Apply an RFC 7396 JSON merge patch to `target` in place.
///
/// Object members merge recursively; `null` removes a member; every other
/// value - arrays included - replaces the target wholesale. Whole-array
/// replacement is exactly why the reconciler can use this against overlay
/// arrays on a CRD.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, patch_value) in patch_map {
            if patch_value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    patch_value,
                );
            }
        }
    }
}
