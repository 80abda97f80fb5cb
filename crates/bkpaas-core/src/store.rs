// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The AppModel store.
//!
//! Owns the canonical AppModel entity and its immutable revisions. "Updating"
//! an AppModel never mutates a revision: a new revision is written and the
//! module's resource row is rebound to it, in one transaction.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use bkpaas_model::manifest::BkAppManifest;
use bkpaas_model::{ApiVersion, Renderer};

use crate::error::{CoreError, Result};
use crate::persistence::{Persistence, RevisionRecord};

/// Identity of a module inside its application and tenant.
///
/// `app_code` is the application's platform code; the store forces
/// `metadata.name` of every manifest to it.
#[derive(Debug, Clone)]
pub struct ModuleRef {
    /// Owning application id.
    pub application_id: String,
    /// Module id, unique per application.
    pub module_id: String,
    /// Application code, a DNS-safe name.
    pub app_code: String,
    /// Tenant scope.
    pub tenant_id: String,
}

impl ModuleRef {
    /// The workload-app identifier of this module in one environment.
    pub fn wl_app_id(&self, environment: &str) -> String {
        format!("{}-{}", self.module_id, environment)
    }
}

/// The AppModel store: validates manifests, writes revisions, rebinds the
/// module resource.
pub struct AppModelStore {
    persistence: Arc<dyn Persistence>,
    renderer: Renderer,
}

impl AppModelStore {
    /// Create a store emitting the given API version.
    pub fn new(persistence: Arc<dyn Persistence>, api_version: ApiVersion) -> Self {
        Self {
            persistence,
            renderer: Renderer::new(api_version),
        }
    }

    /// The renderer this store serializes manifests with.
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Validate a caller-supplied manifest and bind it as the module's
    /// current revision.
    ///
    /// The manifest is parsed strictly (unknown fields rejected), validated
    /// with overlay references checked, then serialized to canonical JSON and
    /// block-style YAML. The revision insert and the resource rebind happen
    /// in one transaction; the operation never partially succeeds.
    #[instrument(skip(self, manifest_json), fields(module_id = %module.module_id))]
    pub async fn create_from_manifest(
        &self,
        module: &ModuleRef,
        manifest_json: &Value,
    ) -> Result<RevisionRecord> {
        let mut manifest = self.renderer.parse_strict(manifest_json).map_err(|err| {
            warn!(error = %err, "manifest rejected");
            err
        })?;
        manifest.validate(&module.app_code, true).map_err(|err| {
            warn!(error = %err, "manifest rejected");
            err
        })?;

        self.bind_revision(module, &manifest).await
    }

    /// Bind an already-validated manifest as the module's current revision.
    ///
    /// Equivalent to create + rebind in one transaction.
    #[instrument(skip(self, manifest), fields(module_id = %module.module_id))]
    pub async fn use_revision(
        &self,
        module: &ModuleRef,
        manifest: &BkAppManifest,
    ) -> Result<RevisionRecord> {
        self.bind_revision(module, manifest).await
    }

    async fn bind_revision(
        &self,
        module: &ModuleRef,
        manifest: &BkAppManifest,
    ) -> Result<RevisionRecord> {
        let revision = RevisionRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: module.tenant_id.clone(),
            application_id: module.application_id.clone(),
            module_id: module.module_id.clone(),
            api_version: self.renderer.emit_version().as_str().to_string(),
            manifest_json: self.renderer.to_canonical_json(manifest)?,
            manifest_yaml: self.renderer.to_yaml(manifest)?,
            deployed_manifest_json: None,
            has_deployed: false,
            is_draft: false,
            is_deleted: false,
            created_at: Utc::now(),
        };

        self.persistence.create_revision_and_bind(&revision).await?;
        info!(revision_id = %revision.id, "revision created and bound");
        Ok(revision)
    }

    /// The revision currently bound to the module.
    pub async fn get_current(&self, module_id: &str) -> Result<RevisionRecord> {
        self.persistence
            .get_current_revision(module_id)
            .await?
            .ok_or_else(|| CoreError::not_found("module", module_id))
    }

    /// The current revision's manifest as a JSON value.
    ///
    /// Read-back is lenient: fields added by newer servers survive.
    pub async fn get_json(&self, module_id: &str) -> Result<Value> {
        let revision = self.get_current(module_id).await?;
        Ok(serde_json::from_str(&revision.manifest_json)?)
    }

    /// The current revision's manifest, parsed.
    pub async fn get_current_manifest(&self, module_id: &str) -> Result<BkAppManifest> {
        let value = self.get_json(module_id).await?;
        Ok(self.renderer.parse_lenient(&value)?)
    }

    /// A specific revision by id.
    pub async fn get_revision(&self, revision_id: &str) -> Result<RevisionRecord> {
        self.persistence
            .get_revision(revision_id)
            .await?
            .ok_or_else(|| CoreError::not_found("revision", revision_id))
    }

    /// The most recent revisions of a module, newest first.
    pub async fn list_revisions(
        &self,
        module_id: &str,
        limit: i64,
    ) -> Result<Vec<RevisionRecord>> {
        self.persistence.list_revisions(module_id, limit).await
    }

    /// Record the first successful deploy of a revision.
    pub async fn mark_deployed(
        &self,
        revision_id: &str,
        deployed_manifest_json: &str,
    ) -> Result<()> {
        self.persistence
            .mark_revision_deployed(revision_id, deployed_manifest_json)
            .await
    }

    /// Cascade delete of a module: mounts, credential projections for both
    /// environments, and the resource/revision rows.
    #[instrument(skip(self), fields(module_id = %module.module_id))]
    pub async fn delete_module(&self, module: &ModuleRef) -> Result<()> {
        let wl_app_ids = vec![module.wl_app_id("stag"), module.wl_app_id("prod")];
        self.persistence
            .delete_module(&module.module_id, &wl_app_ids)
            .await?;
        info!("module deleted");
        Ok(())
    }
}
