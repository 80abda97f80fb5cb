// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! bkpaas-core - AppModel Resource Manager
//!
//! This crate owns the durable state of the application control plane: the
//! canonical AppModel entity with its immutable revisions, the deploy state
//! machine, volume mounts and registry credentials. Cluster reconciliation
//! lives in `bkpaas-controller`; pure manifest computation in `bkpaas-model`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              External callers (CLIs, UIs, APIs)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    bkpaas-controller                        │
//! │       (Reconciler, Scaler, Deploy Orchestrator)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌───────────────────────┐        ┌────────────────────────────┐
//! │     bkpaas-core       │───────▶│  PostgreSQL / SQLite       │
//! │     (This Crate)      │        │  (Durable Storage)         │
//! │  Store / Tracker      │        └────────────────────────────┘
//! └───────────────────────┘
//! ```
//!
//! # Deploy state machine
//!
//! ```text
//! PENDING ──► PROGRESSING ──► READY        (terminal)
//!     │            │
//!     │            └────────► ERROR        (terminal)
//!     └─────────────────────► UNKNOWN      (watchdog, non-terminal)
//! ```
//!
//! `READY` and `ERROR` are absorbing: transition attempts out of them are
//! ignored with a logged warning. Entering either publishes a deploy-end
//! event on the tracker's broadcast channel.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `BKPAAS_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `BKPAAS_API_VERSION` | No | `v1alpha2` | Manifest emission version |
//! | `BKPAAS_DEFAULT_MAX_REPLICAS` | No | `5` | Per-process replica cap |
//! | `BKPAAS_RETRY_BUDGET` | No | `3` | Transient cluster error retries |
//! | `BKPAAS_RETRY_BASE_MS` | No | `500` | Retry backoff base |
//! | `BKPAAS_RETRY_FACTOR` | No | `2.0` | Retry backoff factor |
//! | `BKPAAS_DEPLOY_TIMEOUT_SECONDS` | No | `1800` | Deploy wall-clock budget |
//! | `BKPAAS_STORAGE_CLASS_NAME` | No | - | Default PVC storage class |
//! | `BKPAAS_SECRET_KEY` | No | - | Base64 32-byte key for credential encryption |
//!
//! # Modules
//!
//! - [`config`]: configuration from environment variables
//! - [`credentials`]: credential pairs and the image-credential projection
//! - [`crypto`]: AES-GCM at-rest encryption for credential secrets
//! - [`error`]: error types with kind strings used as Deploy reasons
//! - [`migrations`]: embedded PostgreSQL/SQLite migrations
//! - [`mounts`]: volume mounts and their ConfigMap/PersistentStorage sources
//! - [`persistence`]: storage trait with PostgreSQL and SQLite backends
//! - [`store`]: the AppModel store (revisions and rebinding)
//! - [`tracker`]: the deploy state machine

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Credential pairs and the per-workload image credential projection.
pub mod credentials;

/// AES-GCM at-rest encryption for credential secrets.
pub mod crypto;

/// Error types for core operations.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Volume mounts and mount-source resolution.
pub mod mounts;

/// Storage trait with PostgreSQL and SQLite backends.
pub mod persistence;

/// The AppModel store: immutable revisions bound to module resources.
pub mod store;

/// The deploy state machine and end-of-deploy signals.
pub mod tracker;

pub use config::Config;
pub use error::{CoreError, Result};
