// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Volume mounts and mount-source resolution.
//!
//! A mount is scoped to `stag`, `prod` or the special `_global_` scope.
//! Within one `(module, name)` a `_global_` mount excludes env-scoped mounts
//! and vice versa. Sources are polymorphic over ConfigMap and
//! PersistentStorage, dispatched as a tagged variant at the call site.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use bkpaas_model::AppEnvName;
use bkpaas_model::manifest::validate_dns_label;

use crate::error::{CoreError, Result};
use crate::persistence::{
    ConfigMapSourceRecord, MountRecord, Persistence, PersistentStorageSourceRecord,
};
use crate::store::ModuleRef;

/// The scope marker for mounts effective in every environment.
pub const GLOBAL_SCOPE: &str = "_global_";

/// Scope of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountScope {
    /// Effective in one environment only.
    Env(AppEnvName),
    /// Effective in every environment.
    Global,
}

impl MountScope {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Env(env) => env.as_str(),
            Self::Global => GLOBAL_SCOPE,
        }
    }
}

impl fmt::Display for MountScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MountScope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s == GLOBAL_SCOPE {
            return Ok(Self::Global);
        }
        Ok(Self::Env(s.parse()?))
    }
}

/// Kind of a mount source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountSourceType {
    /// Backed by a ConfigMap source row.
    ConfigMap,
    /// Backed by a PersistentStorage source row.
    PersistentStorage,
}

impl MountSourceType {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigMap => "ConfigMap",
            Self::PersistentStorage => "PersistentStorage",
        }
    }
}

impl FromStr for MountSourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ConfigMap" => Ok(Self::ConfigMap),
            "PersistentStorage" => Ok(Self::PersistentStorage),
            other => Err(CoreError::validation(
                "source_type",
                format!(
                    "unknown source type '{}', expected 'ConfigMap' or 'PersistentStorage'",
                    other
                ),
            )),
        }
    }
}

/// A resolved mount source, dispatched by kind.
#[derive(Debug, Clone)]
pub enum ResolvedMountSource {
    /// ConfigMap data to materialise.
    ConfigMap(ConfigMapSourceRecord),
    /// PersistentStorage claim to materialise.
    PersistentStorage(PersistentStorageSourceRecord),
}

/// Manages mount rows and resolves their sources.
pub struct MountManager {
    persistence: Arc<dyn Persistence>,
}

impl MountManager {
    /// Create a manager over the given persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Create or update a mount.
    ///
    /// Validates the name (DNS label, 2-63 characters) and the mount path
    /// (absolute, no `//`, no NUL), and enforces the `_global_` exclusivity
    /// invariant within `(module, name)`.
    #[instrument(skip(self, module, sub_paths), fields(module_id = %module.module_id, name = %name))]
    pub async fn upsert(
        &self,
        module: &ModuleRef,
        scope: MountScope,
        name: &str,
        mount_path: &str,
        source_type: MountSourceType,
        source_name: &str,
        sub_paths: &[String],
    ) -> Result<MountRecord> {
        validate_mount_name(name)?;
        validate_mount_path(mount_path)?;

        // A _global_ mount and an env-scoped mount may not share a name.
        let siblings = self
            .persistence
            .list_mounts_by_name(&module.module_id, name)
            .await?;
        for sibling in &siblings {
            let sibling_global = sibling.environment_name == GLOBAL_SCOPE;
            let conflicting = match scope {
                MountScope::Global => !sibling_global,
                MountScope::Env(_) => sibling_global,
            };
            if conflicting {
                return Err(CoreError::Conflict(format!(
                    "mount '{}' already exists with scope '{}'",
                    name, sibling.environment_name
                )));
            }
        }

        let now = Utc::now();
        let mount = MountRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: module.tenant_id.clone(),
            module_id: module.module_id.clone(),
            environment_name: scope.as_str().to_string(),
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            source_type: source_type.as_str().to_string(),
            source_name: source_name.to_string(),
            sub_paths: serde_json::to_string(sub_paths)?,
            created_at: now,
            updated_at: now,
        };
        self.persistence.upsert_mount(&mount).await?;
        info!(scope = %scope, "mount upserted");
        Ok(mount)
    }

    /// Mounts effective in one environment: env-scoped rows plus `_global_`.
    pub async fn list_effective(
        &self,
        module_id: &str,
        env: AppEnvName,
    ) -> Result<Vec<MountRecord>> {
        self.persistence
            .list_env_mounts(module_id, env.as_str())
            .await
    }

    /// Delete a mount row.
    pub async fn delete(&self, mount_id: &str) -> Result<()> {
        if !self.persistence.delete_mount(mount_id).await? {
            return Err(CoreError::not_found("mount", mount_id));
        }
        Ok(())
    }

    /// Resolve the source referenced by a mount for one environment.
    ///
    /// The env-scoped source wins over a `_global_` one with the same name.
    /// A mount whose source is missing fails the deploy, so a missing source
    /// surfaces as [`CoreError::NotFound`].
    pub async fn resolve_source(
        &self,
        application_id: &str,
        env: AppEnvName,
        mount: &MountRecord,
    ) -> Result<ResolvedMountSource> {
        let source_type: MountSourceType = mount.source_type.parse()?;
        match source_type {
            MountSourceType::ConfigMap => {
                for scope in [env.as_str(), GLOBAL_SCOPE] {
                    if let Some(source) = self
                        .persistence
                        .get_config_map_source(application_id, scope, &mount.source_name)
                        .await?
                    {
                        return Ok(ResolvedMountSource::ConfigMap(source));
                    }
                }
            }
            MountSourceType::PersistentStorage => {
                for scope in [env.as_str(), GLOBAL_SCOPE] {
                    if let Some(source) = self
                        .persistence
                        .get_persistent_storage_source(application_id, scope, &mount.source_name)
                        .await?
                    {
                        return Ok(ResolvedMountSource::PersistentStorage(source));
                    }
                }
            }
        }
        Err(CoreError::not_found("mount source", &mount.source_name))
    }
}

/// Mount names are DNS labels between 2 and 63 characters.
fn validate_mount_name(name: &str) -> Result<()> {
    if name.len() < 2 {
        return Err(CoreError::validation(
            "name",
            format!("'{}' must be at least 2 characters", name),
        ));
    }
    validate_dns_label(name, "name")?;
    Ok(())
}

/// Mount paths are absolute, without `//` or NUL bytes.
fn validate_mount_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(CoreError::validation(
            "mount_path",
            format!("'{}' must be an absolute path", path),
        ));
    }
    if path.contains("//") {
        return Err(CoreError::validation(
            "mount_path",
            format!("'{}' must not contain '//'", path),
        ));
    }
    if path.contains('\0') {
        return Err(CoreError::validation(
            "mount_path",
            "path must not contain NUL bytes",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_name_rules() {
        assert!(validate_mount_name("etc-config").is_ok());
        assert!(validate_mount_name("ab").is_ok());
        assert!(validate_mount_name("a").is_err());
        assert!(validate_mount_name("UPPER").is_err());
    }

    #[test]
    fn test_mount_path_rules() {
        assert!(validate_mount_path("/etc/app").is_ok());
        assert!(validate_mount_path("etc/app").is_err());
        assert!(validate_mount_path("/etc//app").is_err());
        assert!(validate_mount_path("/etc/\0app").is_err());
    }

    #[test]
    fn test_scope_round_trip() {
        assert_eq!(
            "_global_".parse::<MountScope>().unwrap(),
            MountScope::Global
        );
        assert_eq!(
            "prod".parse::<MountScope>().unwrap(),
            MountScope::Env(AppEnvName::Prod)
        );
        assert!("all".parse::<MountScope>().is_err());
    }

    #[test]
    fn test_source_type_round_trip() {
        assert_eq!(
            "ConfigMap".parse::<MountSourceType>().unwrap(),
            MountSourceType::ConfigMap
        );
        assert_eq!(
            "PersistentStorage".parse::<MountSourceType>().unwrap(),
            MountSourceType::PersistentStorage
        );
        assert!("Secret".parse::<MountSourceType>().is_err());
    }
}
