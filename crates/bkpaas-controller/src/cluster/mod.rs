// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster client abstraction.
//!
//! [`ResourceClient`] is the narrow interface the reconciler needs against a
//! target cluster; [`KubeResourceClient`] implements it over a generic CRD
//! client, [`MockResourceClient`] over an in-memory object store for tests.
//! [`ClientCache`] is the process-wide per-cluster cache.

pub mod cache;
pub mod kube;
pub mod mock;
pub mod traits;

pub use cache::ClientCache;
pub use kube::KubeResourceClient;
pub use mock::MockResourceClient;
pub use traits::{ClusterError, ResourceClient, ResourceKind, merge_patch};
