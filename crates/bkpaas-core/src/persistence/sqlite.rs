// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.
//!
//! Used for embedded deployments and the test suite; the schema is
//! column-compatible with the PostgreSQL backend.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, SqlitePool};

use crate::error::CoreError;

use super::{
    AppModelResourceRecord, ConfigMapSourceRecord, CredentialRecord, DeployRecord,
    EnvClusterRecord, ImageCredentialRecord, ListDeploysFilter, MountRecord, Persistence,
    PersistentStorageSourceRecord, RevisionRecord, map_insert_error,
};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize an in-memory database.
    ///
    /// The pool is limited to a single connection so every query sees the
    /// same in-memory database. Intended for tests and ephemeral embedding.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("failed to open in-memory SQLite: {}", e),
            })?;

        crate::migrations::run_sqlite(&pool)
            .await
            .map_err(|e| CoreError::Database {
                operation: "migrate".to_string(),
                details: format!("failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        crate::migrations::run_sqlite(&pool)
            .await
            .map_err(|e| CoreError::Database {
                operation: "migrate".to_string(),
                details: format!("failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn get_resource(
        &self,
        module_id: &str,
    ) -> Result<Option<AppModelResourceRecord>, CoreError> {
        let record = sqlx::query_as::<_, AppModelResourceRecord>(
            r#"
            SELECT * FROM app_model_resources WHERE module_id = ?
            "#,
        )
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn create_revision_and_bind(
        &self,
        revision: &RevisionRecord,
    ) -> Result<AppModelResourceRecord, CoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO app_model_revisions (
                id, tenant_id, application_id, module_id, api_version,
                manifest_json, manifest_yaml, deployed_manifest_json,
                has_deployed, is_draft, is_deleted, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&revision.id)
        .bind(&revision.tenant_id)
        .bind(&revision.application_id)
        .bind(&revision.module_id)
        .bind(&revision.api_version)
        .bind(&revision.manifest_json)
        .bind(&revision.manifest_yaml)
        .bind(&revision.deployed_manifest_json)
        .bind(revision.has_deployed)
        .bind(revision.is_draft)
        .bind(revision.is_deleted)
        .bind(revision.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO app_model_resources (
                id, tenant_id, application_id, module_id, revision_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (module_id) DO UPDATE
            SET revision_id = excluded.revision_id, updated_at = excluded.updated_at
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&revision.tenant_id)
        .bind(&revision.application_id)
        .bind(&revision.module_id)
        .bind(&revision.id)
        .bind(revision.created_at)
        .bind(revision.created_at)
        .execute(&mut *tx)
        .await?;

        let resource = sqlx::query_as::<_, AppModelResourceRecord>(
            r#"
            SELECT * FROM app_model_resources WHERE module_id = ?
            "#,
        )
        .bind(&revision.module_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(resource)
    }

    async fn get_revision(&self, revision_id: &str) -> Result<Option<RevisionRecord>, CoreError> {
        let record = sqlx::query_as::<_, RevisionRecord>(
            r#"
            SELECT * FROM app_model_revisions WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(revision_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_current_revision(
        &self,
        module_id: &str,
    ) -> Result<Option<RevisionRecord>, CoreError> {
        let record = sqlx::query_as::<_, RevisionRecord>(
            r#"
            SELECT r.* FROM app_model_revisions r
            JOIN app_model_resources res ON res.revision_id = r.id
            WHERE res.module_id = ?
            "#,
        )
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_revisions(
        &self,
        module_id: &str,
        limit: i64,
    ) -> Result<Vec<RevisionRecord>, CoreError> {
        let records = sqlx::query_as::<_, RevisionRecord>(
            r#"
            SELECT * FROM app_model_revisions
            WHERE module_id = ? AND is_deleted = 0
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(module_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn mark_revision_deployed(
        &self,
        revision_id: &str,
        deployed_manifest_json: &str,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE app_model_revisions
            SET has_deployed = 1, deployed_manifest_json = ?
            WHERE id = ?
            "#,
        )
        .bind(deployed_manifest_json)
        .bind(revision_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("revision", revision_id));
        }
        Ok(())
    }

    async fn create_deploy(&self, deploy: &DeployRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO deploys (
                id, tenant_id, application_id, module_id, environment, name,
                revision_id, status, reason, message, operator,
                last_transition_time, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&deploy.id)
        .bind(&deploy.tenant_id)
        .bind(&deploy.application_id)
        .bind(&deploy.module_id)
        .bind(&deploy.environment)
        .bind(&deploy.name)
        .bind(&deploy.revision_id)
        .bind(&deploy.status)
        .bind(&deploy.reason)
        .bind(&deploy.message)
        .bind(&deploy.operator)
        .bind(deploy.last_transition_time)
        .bind(deploy.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "deploy"))?;

        Ok(())
    }

    async fn get_deploy(&self, deploy_id: &str) -> Result<Option<DeployRecord>, CoreError> {
        let record = sqlx::query_as::<_, DeployRecord>(
            r#"
            SELECT * FROM deploys WHERE id = ?
            "#,
        )
        .bind(deploy_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_deploys(
        &self,
        module_id: &str,
        filter: &ListDeploysFilter,
    ) -> Result<Vec<DeployRecord>, CoreError> {
        let mut qb: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT * FROM deploys WHERE module_id = ");
        qb.push_bind(module_id);
        if let Some(ref environment) = filter.environment {
            qb.push(" AND environment = ");
            qb.push_bind(environment);
        }
        if let Some(ref statuses) = filter.statuses {
            qb.push(" AND status IN (");
            let mut separated = qb.separated(", ");
            for status in statuses {
                separated.push_bind(status);
            }
            qb.push(")");
        }
        qb.push(" ORDER BY created_at DESC LIMIT ");
        qb.push_bind(filter.limit);
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset);

        let records = qb
            .build_query_as::<DeployRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn transition_deploy(
        &self,
        deploy_id: &str,
        status: &str,
        reason: Option<&str>,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE deploys
            SET status = ?, reason = ?, message = ?, last_transition_time = ?
            WHERE id = ? AND status NOT IN ('ready', 'error')
            "#,
        )
        .bind(status)
        .bind(reason)
        .bind(message)
        .bind(at)
        .bind(deploy_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_stale_deploys(
        &self,
        statuses: &[&str],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DeployRecord>, CoreError> {
        let mut qb: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT * FROM deploys WHERE last_transition_time < ");
        qb.push_bind(cutoff);
        qb.push(" AND status IN (");
        let mut separated = qb.separated(", ");
        for status in statuses {
            separated.push_bind(*status);
        }
        qb.push(") ORDER BY last_transition_time ASC");

        let records = qb
            .build_query_as::<DeployRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn upsert_mount(&self, mount: &MountRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO mounts (
                id, tenant_id, module_id, environment_name, name, mount_path,
                source_type, source_name, sub_paths, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (module_id, environment_name, name) DO UPDATE
            SET mount_path = excluded.mount_path,
                source_type = excluded.source_type,
                source_name = excluded.source_name,
                sub_paths = excluded.sub_paths,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&mount.id)
        .bind(&mount.tenant_id)
        .bind(&mount.module_id)
        .bind(&mount.environment_name)
        .bind(&mount.name)
        .bind(&mount.mount_path)
        .bind(&mount.source_type)
        .bind(&mount.source_name)
        .bind(&mount.sub_paths)
        .bind(mount.created_at)
        .bind(mount.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_mount(
        &self,
        module_id: &str,
        name: &str,
        environment_name: &str,
    ) -> Result<Option<MountRecord>, CoreError> {
        let record = sqlx::query_as::<_, MountRecord>(
            r#"
            SELECT * FROM mounts
            WHERE module_id = ? AND name = ? AND environment_name = ?
            "#,
        )
        .bind(module_id)
        .bind(name)
        .bind(environment_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_mounts_by_name(
        &self,
        module_id: &str,
        name: &str,
    ) -> Result<Vec<MountRecord>, CoreError> {
        let records = sqlx::query_as::<_, MountRecord>(
            r#"
            SELECT * FROM mounts WHERE module_id = ? AND name = ?
            "#,
        )
        .bind(module_id)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_env_mounts(
        &self,
        module_id: &str,
        environment_name: &str,
    ) -> Result<Vec<MountRecord>, CoreError> {
        let records = sqlx::query_as::<_, MountRecord>(
            r#"
            SELECT * FROM mounts
            WHERE module_id = ? AND environment_name IN (?, '_global_')
            ORDER BY name ASC
            "#,
        )
        .bind(module_id)
        .bind(environment_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn delete_mount(&self, mount_id: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM mounts WHERE id = ?")
            .bind(mount_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_config_map_source(
        &self,
        source: &ConfigMapSourceRecord,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO config_map_sources (
                id, tenant_id, application_id, environment_name, name, data, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (application_id, environment_name, name) DO UPDATE
            SET data = excluded.data
            "#,
        )
        .bind(&source.id)
        .bind(&source.tenant_id)
        .bind(&source.application_id)
        .bind(&source.environment_name)
        .bind(&source.name)
        .bind(&source.data)
        .bind(source.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_config_map_source(
        &self,
        application_id: &str,
        environment_name: &str,
        name: &str,
    ) -> Result<Option<ConfigMapSourceRecord>, CoreError> {
        let record = sqlx::query_as::<_, ConfigMapSourceRecord>(
            r#"
            SELECT * FROM config_map_sources
            WHERE application_id = ? AND environment_name = ? AND name = ?
            "#,
        )
        .bind(application_id)
        .bind(environment_name)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert_persistent_storage_source(
        &self,
        source: &PersistentStorageSourceRecord,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO persistent_storage_sources (
                id, tenant_id, application_id, environment_name, name,
                storage_class, storage_size, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (application_id, environment_name, name) DO UPDATE
            SET storage_class = excluded.storage_class,
                storage_size = excluded.storage_size
            "#,
        )
        .bind(&source.id)
        .bind(&source.tenant_id)
        .bind(&source.application_id)
        .bind(&source.environment_name)
        .bind(&source.name)
        .bind(&source.storage_class)
        .bind(&source.storage_size)
        .bind(source.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_persistent_storage_source(
        &self,
        application_id: &str,
        environment_name: &str,
        name: &str,
    ) -> Result<Option<PersistentStorageSourceRecord>, CoreError> {
        let record = sqlx::query_as::<_, PersistentStorageSourceRecord>(
            r#"
            SELECT * FROM persistent_storage_sources
            WHERE application_id = ? AND environment_name = ? AND name = ?
            "#,
        )
        .bind(application_id)
        .bind(environment_name)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert_credential(&self, credential: &CredentialRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (
                id, tenant_id, application_id, name, username,
                password_encrypted, description, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (application_id, name) DO UPDATE
            SET username = excluded.username,
                password_encrypted = excluded.password_encrypted,
                description = excluded.description,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.tenant_id)
        .bind(&credential.application_id)
        .bind(&credential.name)
        .bind(&credential.username)
        .bind(&credential.password_encrypted)
        .bind(&credential.description)
        .bind(credential.created_at)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_credential(
        &self,
        application_id: &str,
        name: &str,
    ) -> Result<Option<CredentialRecord>, CoreError> {
        let record = sqlx::query_as::<_, CredentialRecord>(
            r#"
            SELECT * FROM credentials WHERE application_id = ? AND name = ?
            "#,
        )
        .bind(application_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_credentials(
        &self,
        application_id: &str,
    ) -> Result<Vec<CredentialRecord>, CoreError> {
        let records = sqlx::query_as::<_, CredentialRecord>(
            r#"
            SELECT * FROM credentials WHERE application_id = ? ORDER BY name ASC
            "#,
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn delete_credential(
        &self,
        application_id: &str,
        name: &str,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM credentials WHERE application_id = ? AND name = ?")
            .bind(application_id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_image_credentials(
        &self,
        wl_app_id: &str,
    ) -> Result<Vec<ImageCredentialRecord>, CoreError> {
        let records = sqlx::query_as::<_, ImageCredentialRecord>(
            r#"
            SELECT * FROM image_credentials WHERE wl_app_id = ? ORDER BY registry ASC
            "#,
        )
        .bind(wl_app_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn upsert_image_credential(&self, row: &ImageCredentialRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO image_credentials (
                id, tenant_id, wl_app_id, registry, username,
                password_encrypted, credential_name, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (wl_app_id, registry) DO UPDATE
            SET username = excluded.username,
                password_encrypted = excluded.password_encrypted,
                credential_name = excluded.credential_name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.id)
        .bind(&row.tenant_id)
        .bind(&row.wl_app_id)
        .bind(&row.registry)
        .bind(&row.username)
        .bind(&row.password_encrypted)
        .bind(&row.credential_name)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_image_credentials_except(
        &self,
        wl_app_id: &str,
        keep: &[String],
    ) -> Result<u64, CoreError> {
        let mut qb: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("DELETE FROM image_credentials WHERE wl_app_id = ");
        qb.push_bind(wl_app_id);
        if !keep.is_empty() {
            qb.push(" AND registry NOT IN (");
            let mut separated = qb.separated(", ");
            for registry in keep {
                separated.push_bind(registry);
            }
            qb.push(")");
        }

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn get_env_cluster(
        &self,
        application_id: &str,
        environment: &str,
    ) -> Result<Option<EnvClusterRecord>, CoreError> {
        let record = sqlx::query_as::<_, EnvClusterRecord>(
            r#"
            SELECT * FROM env_clusters WHERE application_id = ? AND environment = ?
            "#,
        )
        .bind(application_id)
        .bind(environment)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert_env_cluster(&self, record: &EnvClusterRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO env_clusters (
                id, tenant_id, application_id, environment, cluster_name,
                api_server_url, token_encrypted, ca_data, namespace
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (application_id, environment) DO UPDATE
            SET cluster_name = excluded.cluster_name,
                api_server_url = excluded.api_server_url,
                token_encrypted = excluded.token_encrypted,
                ca_data = excluded.ca_data,
                namespace = excluded.namespace
            "#,
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(&record.application_id)
        .bind(&record.environment)
        .bind(&record.cluster_name)
        .bind(&record.api_server_url)
        .bind(&record.token_encrypted)
        .bind(&record.ca_data)
        .bind(&record.namespace)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_module(
        &self,
        module_id: &str,
        wl_app_ids: &[String],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM mounts WHERE module_id = ?")
            .bind(module_id)
            .execute(&mut *tx)
            .await?;

        for wl_app_id in wl_app_ids {
            sqlx::query("DELETE FROM image_credentials WHERE wl_app_id = ?")
                .bind(wl_app_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE app_model_revisions SET is_deleted = 1 WHERE module_id = ?")
            .bind(module_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM app_model_resources WHERE module_id = ?")
            .bind(module_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
