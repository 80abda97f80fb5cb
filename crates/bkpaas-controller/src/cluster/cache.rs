// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-wide per-cluster client cache.
//!
//! Clients are expensive to build (TLS setup, discovery), so one is kept per
//! cluster name. Lifecycle: initialised on first use, the entry for a
//! cluster is evicted when its credentials rotate, and the whole cache is
//! drained on shutdown. This is the only process-wide state in the
//! controller besides the deploy lock registry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use bkpaas_core::persistence::EnvClusterRecord;

use super::kube::KubeResourceClient;
use super::traits::{ResourceClient, Result};

/// Cache of cluster clients, keyed by cluster name.
#[derive(Default)]
pub struct ClientCache {
    clients: DashMap<String, Arc<dyn ResourceClient>>,
}

impl ClientCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The client for a cluster binding, building and caching it on first
    /// use. `bearer_token` is the already-opened token of the binding.
    pub async fn get_or_connect(
        &self,
        cluster: &EnvClusterRecord,
        bearer_token: Option<String>,
    ) -> Result<Arc<dyn ResourceClient>> {
        if let Some(existing) = self.clients.get(&cluster.cluster_name) {
            return Ok(existing.value().clone());
        }

        let client: Arc<dyn ResourceClient> =
            Arc::new(KubeResourceClient::connect(cluster, bearer_token).await?);
        self.clients
            .insert(cluster.cluster_name.clone(), client.clone());
        debug!(cluster = %cluster.cluster_name, "cluster client cached");
        Ok(client)
    }

    /// Install a prebuilt client, e.g. a mock in tests or an in-cluster
    /// client built elsewhere.
    pub fn insert(&self, cluster_name: &str, client: Arc<dyn ResourceClient>) {
        self.clients.insert(cluster_name.to_string(), client);
    }

    /// Drop the entry of one cluster. Called when its credentials rotate.
    pub fn evict(&self, cluster_name: &str) -> bool {
        self.clients.remove(cluster_name).is_some()
    }

    /// Drop every entry. Called on shutdown.
    pub fn drain(&self) {
        let count = self.clients.len();
        self.clients.clear();
        if count > 0 {
            info!(count, "cluster client cache drained");
        }
    }

    /// Number of cached clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// True when no client is cached.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
