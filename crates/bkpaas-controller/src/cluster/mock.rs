// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock cluster client for testing.
//!
//! An in-memory object store that applies real RFC 7396 merge patches, so
//! tests observe the same read-modify-write semantics the API server would
//! produce, without a cluster.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::traits::{ClusterError, ResourceClient, ResourceKind, Result, merge_patch};

type ObjectKey = (String, String, String);

/// Mock cluster client for testing.
#[derive(Default)]
pub struct MockResourceClient {
    objects: Arc<Mutex<HashMap<ObjectKey, Value>>>,
    operations: Arc<Mutex<Vec<String>>>,
    /// Number of upcoming calls that fail with a transient 503.
    transient_failures: AtomicU32,
    /// When set, every call fails with a permanent 422.
    permanent_failure: AtomicBool,
    /// When set, only applies of this kind fail (permanently).
    fail_kind: Mutex<Option<&'static str>>,
}

impl MockResourceClient {
    /// Create an empty mock cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls with HTTP 503 before recovering.
    pub fn fail_transiently(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Fail every call with HTTP 422.
    pub fn fail_permanently(&self) {
        self.permanent_failure.store(true, Ordering::SeqCst);
    }

    /// Fail applies of one kind only, e.g. to simulate a derived resource
    /// being rejected while the CR applies fine.
    pub async fn fail_kind(&self, kind: &'static str) {
        *self.fail_kind.lock().await = Some(kind);
    }

    /// Stored object, if any.
    pub async fn object(&self, namespace: &str, kind: ResourceKind, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .await
            .get(&key(namespace, kind, name))
            .cloned()
    }

    /// Number of stored objects.
    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Seed an object without going through `apply_merge`.
    pub async fn insert(&self, namespace: &str, kind: ResourceKind, name: &str, body: Value) {
        self.objects
            .lock()
            .await
            .insert(key(namespace, kind, name), body);
    }

    /// Operations performed, in order, as `verb kind/name` strings.
    pub async fn operations(&self) -> Vec<String> {
        self.operations.lock().await.clone()
    }

    async fn check_failures(&self, kind: ResourceKind) -> Result<()> {
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClusterError::Api {
                status: 503,
                message: "service unavailable (mock)".to_string(),
            });
        }
        if self.permanent_failure.load(Ordering::SeqCst) {
            return Err(ClusterError::Api {
                status: 422,
                message: "unprocessable entity (mock)".to_string(),
            });
        }
        if *self.fail_kind.lock().await == Some(kind.kind()) {
            return Err(ClusterError::Api {
                status: 422,
                message: format!("{} rejected (mock)", kind.kind()),
            });
        }
        Ok(())
    }

    async fn record(&self, verb: &str, kind: ResourceKind, name: &str) {
        self.operations
            .lock()
            .await
            .push(format!("{} {}/{}", verb, kind.kind(), name));
    }
}

fn key(namespace: &str, kind: ResourceKind, name: &str) -> ObjectKey {
    (
        namespace.to_string(),
        kind.kind().to_string(),
        name.to_string(),
    )
}

#[async_trait]
impl ResourceClient for MockResourceClient {
    async fn apply_merge(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        body: &Value,
    ) -> Result<Value> {
        self.check_failures(kind).await?;
        self.record("apply", kind, name).await;

        let mut objects = self.objects.lock().await;
        let entry = objects.entry(key(namespace, kind, name));
        let stored = match entry {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                merge_patch(occupied.get_mut(), body);
                occupied.get().clone()
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(body.clone()).clone()
            }
        };
        Ok(stored)
    }

    async fn get(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<Value>> {
        self.check_failures(kind).await?;
        Ok(self
            .objects
            .lock()
            .await
            .get(&key(namespace, kind, name))
            .cloned())
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<bool> {
        self.check_failures(kind).await?;
        self.record("delete", kind, name).await;
        Ok(self
            .objects
            .lock()
            .await
            .remove(&key(namespace, kind, name))
            .is_some())
    }
}
