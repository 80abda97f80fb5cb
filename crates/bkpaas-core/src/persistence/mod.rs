// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for bkpaas-core.
//!
//! This module defines the persistence abstraction and backend
//! implementations. All identifiers are stored as TEXT (UUID strings) so the
//! PostgreSQL and SQLite backends stay column-compatible; every row carries a
//! `tenant_id` for multi-tenant scoping.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;

/// Tenant used when callers do not scope explicitly.
pub const DEFAULT_TENANT: &str = "default";

/// The AppModel resource row: one per (application, module), pointing at the
/// currently bound revision.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppModelResourceRecord {
    /// Row identifier (UUID string).
    pub id: String,
    /// Tenant identifier for multi-tenancy isolation.
    pub tenant_id: String,
    /// Owning application.
    pub application_id: String,
    /// Owning module; unique across the table.
    pub module_id: String,
    /// Currently bound revision.
    pub revision_id: String,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the binding last changed.
    pub updated_at: DateTime<Utc>,
}

/// An immutable AppModel revision.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RevisionRecord {
    /// Row identifier (UUID string).
    pub id: String,
    /// Tenant identifier for multi-tenancy isolation.
    pub tenant_id: String,
    /// Owning application.
    pub application_id: String,
    /// Owning module.
    pub module_id: String,
    /// API version the manifest was written against.
    pub api_version: String,
    /// Canonical JSON form of the manifest. Never mutated after insert.
    pub manifest_json: String,
    /// Block-style YAML form of the same manifest.
    pub manifest_yaml: String,
    /// Manifest as last successfully deployed, if ever.
    pub deployed_manifest_json: Option<String>,
    /// Whether this revision has ever been deployed.
    pub has_deployed: bool,
    /// Draft revisions are not deployable.
    pub is_draft: bool,
    /// Soft-delete marker.
    pub is_deleted: bool,
    /// When the revision was created.
    pub created_at: DateTime<Utc>,
}

/// One deploy attempt of a revision into an environment.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeployRecord {
    /// Row identifier (UUID string).
    pub id: String,
    /// Tenant identifier for multi-tenancy isolation.
    pub tenant_id: String,
    /// Owning application.
    pub application_id: String,
    /// Owning module.
    pub module_id: String,
    /// Target environment (`stag` or `prod`).
    pub environment: String,
    /// Caller-chosen name, unique within (application, module, environment).
    pub name: String,
    /// Revision being deployed.
    pub revision_id: String,
    /// Current status (pending, progressing, ready, error, unknown).
    pub status: String,
    /// Machine-readable reason for the current status.
    pub reason: Option<String>,
    /// Human-readable message for the current status.
    pub message: Option<String>,
    /// Who triggered the deploy.
    pub operator: String,
    /// When the status last changed.
    pub last_transition_time: DateTime<Utc>,
    /// When the deploy was created.
    pub created_at: DateTime<Utc>,
}

/// A logical volume mount of a module.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MountRecord {
    /// Row identifier (UUID string).
    pub id: String,
    /// Tenant identifier for multi-tenancy isolation.
    pub tenant_id: String,
    /// Owning module.
    pub module_id: String,
    /// Scope: `stag`, `prod` or `_global_`.
    pub environment_name: String,
    /// Mount name, a DNS label, unique per (module, scope).
    pub name: String,
    /// Absolute path the volume is mounted at.
    pub mount_path: String,
    /// `ConfigMap` or `PersistentStorage`.
    pub source_type: String,
    /// Name of the backing source row.
    pub source_name: String,
    /// JSON array of projected sub paths.
    pub sub_paths: String,
    /// When the mount was created.
    pub created_at: DateTime<Utc>,
    /// When the mount last changed.
    pub updated_at: DateTime<Utc>,
}

impl MountRecord {
    /// Decode the `sub_paths` JSON column.
    pub fn sub_paths(&self) -> Result<Vec<String>, CoreError> {
        Ok(serde_json::from_str(&self.sub_paths)?)
    }
}

/// A ConfigMap mount source.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConfigMapSourceRecord {
    /// Row identifier (UUID string).
    pub id: String,
    /// Tenant identifier for multi-tenancy isolation.
    pub tenant_id: String,
    /// Owning application.
    pub application_id: String,
    /// Scope: `stag`, `prod` or `_global_`.
    pub environment_name: String,
    /// Source name referenced by mounts.
    pub name: String,
    /// JSON object of filename to file content.
    pub data: String,
    /// When the source was created.
    pub created_at: DateTime<Utc>,
}

/// A PersistentStorage mount source.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PersistentStorageSourceRecord {
    /// Row identifier (UUID string).
    pub id: String,
    /// Tenant identifier for multi-tenancy isolation.
    pub tenant_id: String,
    /// Owning application.
    pub application_id: String,
    /// Scope: `stag`, `prod` or `_global_`.
    pub environment_name: String,
    /// Source name referenced by mounts.
    pub name: String,
    /// Storage class; falls back to the configured default when absent.
    pub storage_class: Option<String>,
    /// Requested capacity, e.g. `1Gi`.
    pub storage_size: String,
    /// When the source was created.
    pub created_at: DateTime<Utc>,
}

/// A named credential pair owned by an application.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRecord {
    /// Row identifier (UUID string).
    pub id: String,
    /// Tenant identifier for multi-tenancy isolation.
    pub tenant_id: String,
    /// Owning application.
    pub application_id: String,
    /// Credential name, unique per application.
    pub name: String,
    /// Registry username.
    pub username: String,
    /// Registry password, sealed by [`crate::crypto::SecretBox`].
    pub password_encrypted: String,
    /// Free-form description.
    pub description: Option<String>,
    /// When the credential was created.
    pub created_at: DateTime<Utc>,
    /// When the credential last changed.
    pub updated_at: DateTime<Utc>,
}

/// One projected image-pull credential for a workload app.
///
/// Maintained exclusively by credential sync: after a sync the set of rows
/// for a workload app equals exactly the set of referenced images.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImageCredentialRecord {
    /// Row identifier (UUID string).
    pub id: String,
    /// Tenant identifier for multi-tenancy isolation.
    pub tenant_id: String,
    /// Workload app (one per module environment) the row belongs to.
    pub wl_app_id: String,
    /// Image reference the credential applies to.
    pub registry: String,
    /// Registry username.
    pub username: String,
    /// Registry password, sealed.
    pub password_encrypted: String,
    /// Name of the credential pair the row was projected from.
    pub credential_name: String,
    /// When the row was last synced.
    pub updated_at: DateTime<Utc>,
}

/// Cluster binding of one (application, environment).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnvClusterRecord {
    /// Row identifier (UUID string).
    pub id: String,
    /// Tenant identifier for multi-tenancy isolation.
    pub tenant_id: String,
    /// Owning application.
    pub application_id: String,
    /// Environment (`stag` or `prod`).
    pub environment: String,
    /// Cluster name, the client-cache key.
    pub cluster_name: String,
    /// Kubernetes API endpoint.
    pub api_server_url: String,
    /// Bearer token, sealed; absent for in-cluster config.
    pub token_encrypted: Option<String>,
    /// Base64 CA bundle.
    pub ca_data: Option<String>,
    /// Namespace derived for the environment.
    pub namespace: String,
}

/// Filter options for listing deploys.
#[derive(Debug, Clone)]
pub struct ListDeploysFilter {
    /// Filter by environment.
    pub environment: Option<String>,
    /// Filter by status set.
    pub statuses: Option<Vec<String>>,
    /// Maximum rows returned.
    pub limit: i64,
    /// Rows skipped before the first returned.
    pub offset: i64,
}

impl Default for ListDeploysFilter {
    fn default() -> Self {
        Self {
            environment: None,
            statuses: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// Persistence interface used by the store, tracker and controller.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // ------------------------------------------------------------------
    // AppModel resources and revisions
    // ------------------------------------------------------------------

    async fn get_resource(&self, module_id: &str)
    -> Result<Option<AppModelResourceRecord>, CoreError>;

    /// Insert a revision and bind it as current in one transaction.
    ///
    /// Creates the AppModelResource row on first use, rebinds it otherwise.
    /// Never partially succeeds.
    async fn create_revision_and_bind(
        &self,
        revision: &RevisionRecord,
    ) -> Result<AppModelResourceRecord, CoreError>;

    async fn get_revision(&self, revision_id: &str) -> Result<Option<RevisionRecord>, CoreError>;

    /// The revision currently bound to the module's resource.
    async fn get_current_revision(
        &self,
        module_id: &str,
    ) -> Result<Option<RevisionRecord>, CoreError>;

    async fn list_revisions(
        &self,
        module_id: &str,
        limit: i64,
    ) -> Result<Vec<RevisionRecord>, CoreError>;

    /// Record the first successful deploy of a revision.
    async fn mark_revision_deployed(
        &self,
        revision_id: &str,
        deployed_manifest_json: &str,
    ) -> Result<(), CoreError>;

    // ------------------------------------------------------------------
    // Deploys
    // ------------------------------------------------------------------

    /// Insert a deploy row. A duplicate (module, environment, name) maps to
    /// [`CoreError::Conflict`].
    async fn create_deploy(&self, deploy: &DeployRecord) -> Result<(), CoreError>;

    async fn get_deploy(&self, deploy_id: &str) -> Result<Option<DeployRecord>, CoreError>;

    async fn list_deploys(
        &self,
        module_id: &str,
        filter: &ListDeploysFilter,
    ) -> Result<Vec<DeployRecord>, CoreError>;

    /// Apply a status transition unless the deploy is already terminal.
    ///
    /// Returns true when the update was applied, false when it was refused
    /// (row missing or in `ready`/`error`).
    async fn transition_deploy(
        &self,
        deploy_id: &str,
        status: &str,
        reason: Option<&str>,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Non-terminal deploys in one of `statuses` whose last transition is
    /// older than `cutoff`. Used by the watchdog.
    async fn list_stale_deploys(
        &self,
        statuses: &[&str],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DeployRecord>, CoreError>;

    // ------------------------------------------------------------------
    // Mounts and mount sources
    // ------------------------------------------------------------------

    async fn upsert_mount(&self, mount: &MountRecord) -> Result<(), CoreError>;

    async fn get_mount(
        &self,
        module_id: &str,
        name: &str,
        environment_name: &str,
    ) -> Result<Option<MountRecord>, CoreError>;

    /// All rows sharing (module, name) regardless of scope - used for the
    /// `_global_` exclusivity check.
    async fn list_mounts_by_name(
        &self,
        module_id: &str,
        name: &str,
    ) -> Result<Vec<MountRecord>, CoreError>;

    /// Mounts effective in an environment: env-scoped rows plus `_global_`.
    async fn list_env_mounts(
        &self,
        module_id: &str,
        environment_name: &str,
    ) -> Result<Vec<MountRecord>, CoreError>;

    async fn delete_mount(&self, mount_id: &str) -> Result<bool, CoreError>;

    async fn upsert_config_map_source(
        &self,
        source: &ConfigMapSourceRecord,
    ) -> Result<(), CoreError>;

    async fn get_config_map_source(
        &self,
        application_id: &str,
        environment_name: &str,
        name: &str,
    ) -> Result<Option<ConfigMapSourceRecord>, CoreError>;

    async fn upsert_persistent_storage_source(
        &self,
        source: &PersistentStorageSourceRecord,
    ) -> Result<(), CoreError>;

    async fn get_persistent_storage_source(
        &self,
        application_id: &str,
        environment_name: &str,
        name: &str,
    ) -> Result<Option<PersistentStorageSourceRecord>, CoreError>;

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    async fn upsert_credential(&self, credential: &CredentialRecord) -> Result<(), CoreError>;

    async fn get_credential(
        &self,
        application_id: &str,
        name: &str,
    ) -> Result<Option<CredentialRecord>, CoreError>;

    async fn list_credentials(
        &self,
        application_id: &str,
    ) -> Result<Vec<CredentialRecord>, CoreError>;

    async fn delete_credential(
        &self,
        application_id: &str,
        name: &str,
    ) -> Result<bool, CoreError>;

    async fn list_image_credentials(
        &self,
        wl_app_id: &str,
    ) -> Result<Vec<ImageCredentialRecord>, CoreError>;

    async fn upsert_image_credential(
        &self,
        row: &ImageCredentialRecord,
    ) -> Result<(), CoreError>;

    /// Delete projection rows whose registry is not in `keep`. Returns the
    /// number of rows pruned.
    async fn delete_image_credentials_except(
        &self,
        wl_app_id: &str,
        keep: &[String],
    ) -> Result<u64, CoreError>;

    // ------------------------------------------------------------------
    // Cluster bindings
    // ------------------------------------------------------------------

    async fn get_env_cluster(
        &self,
        application_id: &str,
        environment: &str,
    ) -> Result<Option<EnvClusterRecord>, CoreError>;

    async fn upsert_env_cluster(&self, record: &EnvClusterRecord) -> Result<(), CoreError>;

    // ------------------------------------------------------------------
    // Module lifecycle
    // ------------------------------------------------------------------

    /// Cascade delete of a module: its mounts, its credential projections
    /// (per workload app) and its resource/revision rows (soft-deleted).
    async fn delete_module(&self, module_id: &str, wl_app_ids: &[String])
    -> Result<(), CoreError>;

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    async fn health_check_db(&self) -> Result<bool, CoreError>;
}

/// Map a sqlx error, converting unique violations into [`CoreError::Conflict`].
pub(crate) fn map_insert_error(err: sqlx::Error, what: &str) -> CoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return CoreError::Conflict(format!("{} already exists", what));
    }
    err.into()
}
