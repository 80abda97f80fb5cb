// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credential pairs and the image-pull credential projection.
//!
//! Applications own named `(username, password)` pairs; passwords are sealed
//! before they reach the database. Before each deploy the reconciler projects
//! the pairs referenced by the manifest into per-workload image credential
//! rows; after a sync the projection equals exactly the referenced image set.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::crypto::SecretBox;
use crate::error::{CoreError, Result};
use crate::persistence::{CredentialRecord, ImageCredentialRecord, Persistence};

/// One `{credential_name, image}` reference handed to credential sync.
#[derive(Debug, Clone)]
pub struct CredentialRef {
    /// Name of the credential pair to project.
    pub credential_name: String,
    /// Image reference the credential applies to.
    pub image: String,
}

/// Manages credential pairs and their image projection.
pub struct CredentialStore {
    persistence: Arc<dyn Persistence>,
    secrets: SecretBox,
}

impl CredentialStore {
    /// Create a store sealing secrets with the given box.
    pub fn new(persistence: Arc<dyn Persistence>, secrets: SecretBox) -> Self {
        Self {
            persistence,
            secrets,
        }
    }

    /// Create or update a credential pair. `(application_id, name)` is
    /// unique; upserting an existing name replaces its secret.
    #[instrument(skip(self, username, password, description), fields(application_id = %application_id, name = %name))]
    pub async fn upsert(
        &self,
        application_id: &str,
        tenant_id: &str,
        name: &str,
        username: &str,
        password: &str,
        description: Option<&str>,
    ) -> Result<CredentialRecord> {
        let now = Utc::now();
        let record = CredentialRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            application_id: application_id.to_string(),
            name: name.to_string(),
            username: username.to_string(),
            password_encrypted: self.secrets.seal(password)?,
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        self.persistence.upsert_credential(&record).await?;
        Ok(record)
    }

    /// A credential pair by name.
    pub async fn get(&self, application_id: &str, name: &str) -> Result<CredentialRecord> {
        self.persistence
            .get_credential(application_id, name)
            .await?
            .ok_or_else(|| CoreError::not_found("credential", name))
    }

    /// All credential pairs of an application.
    pub async fn list(&self, application_id: &str) -> Result<Vec<CredentialRecord>> {
        self.persistence.list_credentials(application_id).await
    }

    /// Delete a credential pair.
    pub async fn delete(&self, application_id: &str, name: &str) -> Result<()> {
        if !self
            .persistence
            .delete_credential(application_id, name)
            .await?
        {
            return Err(CoreError::not_found("credential", name));
        }
        Ok(())
    }

    /// Open the sealed password of a credential or projection row.
    pub fn reveal(&self, password_encrypted: &str) -> Result<String> {
        self.secrets.open(password_encrypted)
    }

    /// Synchronise the image-credential projection of a workload app.
    ///
    /// For every reference the credential is looked up by name and a row per
    /// `(wl_app, image)` is created or updated; pre-existing rows whose image
    /// is not referenced are pruned. After the call the persisted set equals
    /// exactly the referenced image set.
    #[instrument(skip(self, references), fields(application_id = %application_id, wl_app_id = %wl_app_id, count = references.len()))]
    pub async fn sync_image_credentials(
        &self,
        application_id: &str,
        tenant_id: &str,
        wl_app_id: &str,
        references: &[CredentialRef],
    ) -> Result<Vec<ImageCredentialRecord>> {
        let now = Utc::now();
        let mut keep: HashSet<String> = HashSet::with_capacity(references.len());

        for reference in references {
            let credential = self.get(application_id, &reference.credential_name).await?;
            let row = ImageCredentialRecord {
                id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                wl_app_id: wl_app_id.to_string(),
                registry: reference.image.clone(),
                username: credential.username.clone(),
                // Same key seals both tables; the ciphertext moves as-is.
                password_encrypted: credential.password_encrypted.clone(),
                credential_name: credential.name.clone(),
                updated_at: now,
            };
            self.persistence.upsert_image_credential(&row).await?;
            keep.insert(reference.image.clone());
        }

        let keep: Vec<String> = keep.into_iter().collect();
        let pruned = self
            .persistence
            .delete_image_credentials_except(wl_app_id, &keep)
            .await?;
        if pruned > 0 {
            info!(pruned, "pruned unreferenced image credentials");
        }

        self.persistence.list_image_credentials(wl_app_id).await
    }

    /// The current projection rows of a workload app.
    pub async fn list_image_credentials(
        &self,
        wl_app_id: &str,
    ) -> Result<Vec<ImageCredentialRecord>> {
        self.persistence.list_image_credentials(wl_app_id).await
    }
}
