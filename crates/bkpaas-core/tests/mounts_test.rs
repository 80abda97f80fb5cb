// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for mounts and mount-source resolution.

mod common;

use chrono::Utc;
use common::*;
use serde_json::json;

use bkpaas_core::error::CoreError;
use bkpaas_core::mounts::{
    MountManager, MountScope, MountSourceType, ResolvedMountSource,
};
use bkpaas_core::persistence::{ConfigMapSourceRecord, PersistentStorageSourceRecord};
use bkpaas_model::AppEnvName;

#[tokio::test]
async fn test_upsert_and_list_effective_mounts() {
    let persistence = persistence().await;
    let manager = MountManager::new(persistence);
    let module = demo_module();

    manager
        .upsert(
            &module,
            MountScope::Global,
            "app-config",
            "/etc/app",
            MountSourceType::ConfigMap,
            "app-config-files",
            &[],
        )
        .await
        .unwrap();
    manager
        .upsert(
            &module,
            MountScope::Env(AppEnvName::Prod),
            "prod-data",
            "/var/data",
            MountSourceType::PersistentStorage,
            "prod-volume",
            &["subdir".to_string()],
        )
        .await
        .unwrap();

    // prod sees both, stag only the global one.
    let prod = manager
        .list_effective(&module.module_id, AppEnvName::Prod)
        .await
        .unwrap();
    assert_eq!(prod.len(), 2);

    let stag = manager
        .list_effective(&module.module_id, AppEnvName::Stag)
        .await
        .unwrap();
    assert_eq!(stag.len(), 1);
    assert_eq!(stag[0].name, "app-config");

    let data = prod.iter().find(|m| m.name == "prod-data").unwrap();
    assert_eq!(data.sub_paths().unwrap(), vec!["subdir".to_string()]);
}

#[tokio::test]
async fn test_global_scope_excludes_env_scoped_twin() {
    let persistence = persistence().await;
    let manager = MountManager::new(persistence);
    let module = demo_module();

    manager
        .upsert(
            &module,
            MountScope::Global,
            "app-config",
            "/etc/app",
            MountSourceType::ConfigMap,
            "app-config-files",
            &[],
        )
        .await
        .unwrap();

    let err = manager
        .upsert(
            &module,
            MountScope::Env(AppEnvName::Prod),
            "app-config",
            "/etc/app-prod",
            MountSourceType::ConfigMap,
            "app-config-files",
            &[],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    // And the other direction.
    manager
        .upsert(
            &module,
            MountScope::Env(AppEnvName::Stag),
            "stag-only",
            "/etc/stag",
            MountSourceType::ConfigMap,
            "stag-files",
            &[],
        )
        .await
        .unwrap();
    let err = manager
        .upsert(
            &module,
            MountScope::Global,
            "stag-only",
            "/etc/stag",
            MountSourceType::ConfigMap,
            "stag-files",
            &[],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn test_upsert_same_scope_replaces() {
    let persistence = persistence().await;
    let manager = MountManager::new(persistence);
    let module = demo_module();

    manager
        .upsert(
            &module,
            MountScope::Global,
            "app-config",
            "/etc/app",
            MountSourceType::ConfigMap,
            "v1-files",
            &[],
        )
        .await
        .unwrap();
    manager
        .upsert(
            &module,
            MountScope::Global,
            "app-config",
            "/etc/app",
            MountSourceType::ConfigMap,
            "v2-files",
            &[],
        )
        .await
        .unwrap();

    let mounts = manager
        .list_effective(&module.module_id, AppEnvName::Prod)
        .await
        .unwrap();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].source_name, "v2-files");
}

#[tokio::test]
async fn test_invalid_names_and_paths_rejected() {
    let persistence = persistence().await;
    let manager = MountManager::new(persistence);
    let module = demo_module();

    for (name, path) in [("a", "/ok"), ("ok-name", "relative"), ("ok-name", "/a//b")] {
        let err = manager
            .upsert(
                &module,
                MountScope::Global,
                name,
                path,
                MountSourceType::ConfigMap,
                "files",
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }
}

#[tokio::test]
async fn test_source_resolution_prefers_env_over_global() {
    let persistence = persistence().await;
    let manager = MountManager::new(persistence.clone());
    let module = demo_module();

    let mount = manager
        .upsert(
            &module,
            MountScope::Env(AppEnvName::Prod),
            "app-config",
            "/etc/app",
            MountSourceType::ConfigMap,
            "app-files",
            &[],
        )
        .await
        .unwrap();

    for (scope, content) in [("_global_", "global"), ("prod", "prod")] {
        persistence
            .upsert_config_map_source(&ConfigMapSourceRecord {
                id: uuid::Uuid::new_v4().to_string(),
                tenant_id: "default".to_string(),
                application_id: module.application_id.clone(),
                environment_name: scope.to_string(),
                name: "app-files".to_string(),
                data: json!({"app.ini": content}).to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let resolved = manager
        .resolve_source(&module.application_id, AppEnvName::Prod, &mount)
        .await
        .unwrap();
    let ResolvedMountSource::ConfigMap(source) = resolved else {
        panic!("expected a ConfigMap source");
    };
    assert_eq!(source.environment_name, "prod");
}

#[tokio::test]
async fn test_missing_source_is_not_found() {
    let persistence = persistence().await;
    let manager = MountManager::new(persistence);
    let module = demo_module();

    let mount = manager
        .upsert(
            &module,
            MountScope::Env(AppEnvName::Prod),
            "prod-data",
            "/var/data",
            MountSourceType::PersistentStorage,
            "missing-volume",
            &[],
        )
        .await
        .unwrap();

    let err = manager
        .resolve_source(&module.application_id, AppEnvName::Prod, &mount)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_persistent_storage_resolution() {
    let persistence = persistence().await;
    let manager = MountManager::new(persistence.clone());
    let module = demo_module();

    let mount = manager
        .upsert(
            &module,
            MountScope::Env(AppEnvName::Prod),
            "prod-data",
            "/var/data",
            MountSourceType::PersistentStorage,
            "prod-volume",
            &[],
        )
        .await
        .unwrap();

    persistence
        .upsert_persistent_storage_source(&PersistentStorageSourceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: "default".to_string(),
            application_id: module.application_id.clone(),
            environment_name: "prod".to_string(),
            name: "prod-volume".to_string(),
            storage_class: None,
            storage_size: "1Gi".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let resolved = manager
        .resolve_source(&module.application_id, AppEnvName::Prod, &mount)
        .await
        .unwrap();
    let ResolvedMountSource::PersistentStorage(source) = resolved else {
        panic!("expected a PersistentStorage source");
    };
    assert_eq!(source.storage_size, "1Gi");
}

#[tokio::test]
async fn test_delete_mount() {
    let persistence = persistence().await;
    let manager = MountManager::new(persistence);
    let module = demo_module();

    let mount = manager
        .upsert(
            &module,
            MountScope::Global,
            "app-config",
            "/etc/app",
            MountSourceType::ConfigMap,
            "files",
            &[],
        )
        .await
        .unwrap();

    manager.delete(&mount.id).await.unwrap();
    let err = manager.delete(&mount.id).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}
