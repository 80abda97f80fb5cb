// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! bkpaas-model - AppModel Manifest Layer
//!
//! This crate owns the in-memory representation of an AppModel manifest (the
//! declarative document behind a `BkApp` custom resource) and every pure
//! computation on top of it:
//!
//! - [`manifest`]: typed manifest structs with camelCase wire names
//! - [`render`]: JSON/YAML round-trips and the deployable form (nulls and
//!   `status` stripped, `metadata.generation` removed)
//! - [`overlay`]: environment overlay resolution with defined precedence
//! - [`quota`]: resource-quota plan tokens (`default`, `4C1G`, `2.5C3G`, ...)
//! - [`procs`]: the flat per-process view consumed by external readers
//!
//! Everything here is CPU-bound and never suspends; persistence and cluster
//! I/O live in `bkpaas-core` and `bkpaas-controller`.
//!
//! # Manifest shape
//!
//! ```text
//! apiVersion: paas.bk.tencent.com/v1alpha2
//! kind: BkApp
//! metadata:
//!   name: my-app
//! spec:
//!   processes:
//!     - name: web
//!       replicas: 2
//!       resQuotaPlan: 4C1G
//!       targetPort: 5000
//!   envOverlay:
//!     replicas:
//!       - envName: prod
//!         process: web
//!         count: 5
//! ```

pub mod error;
pub mod manifest;
pub mod overlay;
pub mod procs;
pub mod quota;
pub mod render;

pub use error::{ModelError, ValidationError};
pub use manifest::{ApiVersion, AppEnvName, BkAppManifest};
pub use overlay::OverlayResolver;
pub use procs::{ProcSpec, TargetStatus};
pub use quota::QuotaPlan;
pub use render::Renderer;
