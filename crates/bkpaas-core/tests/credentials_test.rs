// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for credential pairs and the image projection.

mod common;

use common::*;

use bkpaas_core::credentials::{CredentialRef, CredentialStore};
use bkpaas_core::crypto::SecretBox;
use bkpaas_core::error::CoreError;

fn credential_store(
    persistence: std::sync::Arc<dyn bkpaas_core::persistence::Persistence>,
) -> CredentialStore {
    CredentialStore::new(persistence, SecretBox::new(TEST_SECRET_KEY).unwrap())
}

#[tokio::test]
async fn test_passwords_are_sealed_at_rest() {
    let store = credential_store(persistence().await);

    let record = store
        .upsert("app-0001", "default", "c1", "robot", "hunter2", None)
        .await
        .unwrap();

    assert_ne!(record.password_encrypted, "hunter2");
    assert_eq!(store.reveal(&record.password_encrypted).unwrap(), "hunter2");
}

#[tokio::test]
async fn test_upsert_replaces_by_name() {
    let store = credential_store(persistence().await);

    store
        .upsert("app-0001", "default", "c1", "robot", "old", None)
        .await
        .unwrap();
    store
        .upsert("app-0001", "default", "c1", "robot2", "new", Some("rotated"))
        .await
        .unwrap();

    let listed = store.list("app-0001").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].username, "robot2");
    assert_eq!(store.reveal(&listed[0].password_encrypted).unwrap(), "new");
}

#[tokio::test]
async fn test_delete_credential() {
    let store = credential_store(persistence().await);

    store
        .upsert("app-0001", "default", "c1", "robot", "pw", None)
        .await
        .unwrap();
    store.delete("app-0001", "c1").await.unwrap();
    let err = store.get("app-0001", "c1").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

/// The credential-sync pruning scenario: rows not named by the sync are
/// deleted, named ones are updated or created.
#[tokio::test]
async fn test_sync_prunes_to_exactly_the_referenced_set() {
    let store = credential_store(persistence().await);
    let wl_app = "module-0001-prod";

    store
        .upsert("app-0001", "default", "c0", "old-bot", "old-pw", None)
        .await
        .unwrap();
    store
        .upsert("app-0001", "default", "c1", "bot-1", "pw-1", None)
        .await
        .unwrap();
    store
        .upsert("app-0001", "default", "c2", "bot-2", "pw-2", None)
        .await
        .unwrap();

    // Seed the projection with two images.
    store
        .sync_image_credentials(
            "app-0001",
            "default",
            wl_app,
            &[
                CredentialRef {
                    credential_name: "c0".into(),
                    image: "a.io/img1".into(),
                },
                CredentialRef {
                    credential_name: "c0".into(),
                    image: "b.io/img2".into(),
                },
            ],
        )
        .await
        .unwrap();

    // Re-sync: img1 dropped, img2 re-pointed at c1, img3 added from c2.
    let rows = store
        .sync_image_credentials(
            "app-0001",
            "default",
            wl_app,
            &[
                CredentialRef {
                    credential_name: "c1".into(),
                    image: "b.io/img2".into(),
                },
                CredentialRef {
                    credential_name: "c2".into(),
                    image: "c.io/img3".into(),
                },
            ],
        )
        .await
        .unwrap();

    let mut registries: Vec<&str> = rows.iter().map(|r| r.registry.as_str()).collect();
    registries.sort();
    assert_eq!(registries, vec!["b.io/img2", "c.io/img3"]);

    let img2 = rows.iter().find(|r| r.registry == "b.io/img2").unwrap();
    assert_eq!(img2.credential_name, "c1");
    assert_eq!(store.reveal(&img2.password_encrypted).unwrap(), "pw-1");

    let img3 = rows.iter().find(|r| r.registry == "c.io/img3").unwrap();
    assert_eq!(store.reveal(&img3.password_encrypted).unwrap(), "pw-2");
}

#[tokio::test]
async fn test_sync_with_empty_references_clears_the_projection() {
    let store = credential_store(persistence().await);
    let wl_app = "module-0001-prod";

    store
        .upsert("app-0001", "default", "c1", "bot", "pw", None)
        .await
        .unwrap();
    store
        .sync_image_credentials(
            "app-0001",
            "default",
            wl_app,
            &[CredentialRef {
                credential_name: "c1".into(),
                image: "a.io/img1".into(),
            }],
        )
        .await
        .unwrap();

    let rows = store
        .sync_image_credentials("app-0001", "default", wl_app, &[])
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_sync_with_unknown_credential_fails() {
    let store = credential_store(persistence().await);

    let err = store
        .sync_image_credentials(
            "app-0001",
            "default",
            "module-0001-prod",
            &[CredentialRef {
                credential_name: "ghost".into(),
                image: "a.io/img1".into(),
            }],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_projections_are_scoped_per_workload_app() {
    let store = credential_store(persistence().await);

    store
        .upsert("app-0001", "default", "c1", "bot", "pw", None)
        .await
        .unwrap();
    for wl_app in ["module-0001-stag", "module-0001-prod"] {
        store
            .sync_image_credentials(
                "app-0001",
                "default",
                wl_app,
                &[CredentialRef {
                    credential_name: "c1".into(),
                    image: "a.io/img1".into(),
                }],
            )
            .await
            .unwrap();
    }

    // Clearing prod leaves stag untouched.
    store
        .sync_image_credentials("app-0001", "default", "module-0001-prod", &[])
        .await
        .unwrap();
    let stag = store
        .list_image_credentials("module-0001-stag")
        .await
        .unwrap();
    assert_eq!(stag.len(), 1);
}
