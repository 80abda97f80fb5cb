// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for replica and autoscaling operations.

mod common;

use common::*;
use serde_json::json;

use bkpaas_controller::error::ControllerError;
use bkpaas_core::error::CoreError;
use bkpaas_model::AppEnvName;
use bkpaas_model::manifest::AutoscalingConfig;

async fn deployed_context() -> (TestContext, String) {
    let ctx = TestContext::new().await;
    let deploy = ctx
        .deployer
        .deploy(ctx.request(AppEnvName::Prod, Some(web_manifest()), "release-1"))
        .await
        .unwrap();
    assert_eq!(deploy.status, "progressing");
    let id = deploy.id.clone();
    ctx.finish_deploy(&id).await;
    (ctx, id)
}

/// Scenario: scale up with overlay. The prod overlay appears on the CR as a
/// whole replaced array; stag keeps the main value.
#[tokio::test]
async fn test_set_replicas_writes_the_overlay() {
    let (ctx, _) = deployed_context().await;

    ctx.scaler
        .set_replicas(&ctx.module, AppEnvName::Prod, "web", 5)
        .await
        .unwrap();

    assert_eq!(
        ctx.scaler
            .get_replicas(&ctx.module, AppEnvName::Prod, "web")
            .await
            .unwrap(),
        5
    );
    assert_eq!(
        ctx.scaler
            .get_replicas(&ctx.module, AppEnvName::Stag, "web")
            .await
            .unwrap(),
        2
    );

    let bkapp = ctx.mock.object(PROD_NS, BKAPP, "demo-app").await.unwrap();
    assert_eq!(
        bkapp["spec"]["envOverlay"]["replicas"],
        json!([{"envName": "prod", "process": "web", "count": 5}])
    );
}

#[tokio::test]
async fn test_set_replicas_is_idempotent() {
    let (ctx, _) = deployed_context().await;

    for _ in 0..2 {
        ctx.scaler
            .set_replicas(&ctx.module, AppEnvName::Prod, "web", 5)
            .await
            .unwrap();
    }

    let bkapp = ctx.mock.object(PROD_NS, BKAPP, "demo-app").await.unwrap();
    let entries = bkapp["spec"]["envOverlay"]["replicas"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_set_replicas_bounds_and_unknown_process() {
    let (ctx, _) = deployed_context().await;

    let err = ctx
        .scaler
        .set_replicas(&ctx.module, AppEnvName::Prod, "web", -1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Core(CoreError::Validation { .. })
    ));

    let err = ctx
        .scaler
        .set_replicas(&ctx.module, AppEnvName::Prod, "ghost", 3)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Core(CoreError::NotFound { .. })
    ));

    let err = ctx
        .scaler
        .get_replicas(&ctx.module, AppEnvName::Prod, "ghost")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Core(CoreError::Model(_))
    ));
}

/// Scenario: autoscaling toggle. The overlay entry appears, then disappears;
/// a max above the cluster cap is rejected.
#[tokio::test]
async fn test_autoscaling_toggle() {
    let (ctx, _) = deployed_context().await;

    ctx.scaler
        .set_autoscaling(
            &ctx.module,
            AppEnvName::Prod,
            "web",
            true,
            Some(AutoscalingConfig {
                min_replicas: 2,
                max_replicas: 5,
                policy: "default".to_string(),
            }),
        )
        .await
        .unwrap();

    let config = ctx
        .scaler
        .get_autoscaling(&ctx.module, AppEnvName::Prod, "web")
        .await
        .unwrap()
        .expect("autoscaling should be set");
    assert_eq!(config.min_replicas, 2);
    assert_eq!(config.max_replicas, 5);

    let bkapp = ctx.mock.object(PROD_NS, BKAPP, "demo-app").await.unwrap();
    assert_eq!(
        bkapp["spec"]["envOverlay"]["autoscaling"],
        json!([{
            "envName": "prod",
            "process": "web",
            "minReplicas": 2,
            "maxReplicas": 5,
            "policy": "default"
        }])
    );

    // Disable: the entry disappears from store and CR.
    ctx.scaler
        .set_autoscaling(&ctx.module, AppEnvName::Prod, "web", false, None)
        .await
        .unwrap();
    assert!(
        ctx.scaler
            .get_autoscaling(&ctx.module, AppEnvName::Prod, "web")
            .await
            .unwrap()
            .is_none()
    );
    let bkapp = ctx.mock.object(PROD_NS, BKAPP, "demo-app").await.unwrap();
    assert_eq!(bkapp["spec"]["envOverlay"]["autoscaling"], json!([]));
}

#[tokio::test]
async fn test_autoscaling_bounds() {
    let (ctx, _) = deployed_context().await;

    // max above the configured cap (5) is rejected.
    let err = ctx
        .scaler
        .set_autoscaling(
            &ctx.module,
            AppEnvName::Prod,
            "web",
            true,
            Some(AutoscalingConfig {
                min_replicas: 2,
                max_replicas: 99,
                policy: "default".to_string(),
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Core(CoreError::Validation { .. })
    ));

    // min below 1 and max below min are rejected.
    for (min, max) in [(0, 3), (4, 2)] {
        let err = ctx
            .scaler
            .set_autoscaling(
                &ctx.module,
                AppEnvName::Prod,
                "web",
                true,
                Some(AutoscalingConfig {
                    min_replicas: min,
                    max_replicas: max,
                    policy: "default".to_string(),
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Core(CoreError::Validation { .. })
        ));
    }

    // Enabling without a configuration is invalid.
    let err = ctx
        .scaler
        .set_autoscaling(&ctx.module, AppEnvName::Prod, "web", true, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Core(CoreError::Validation { .. })
    ));
}

/// Overlay writes survive without a deployed CR: the store is updated and
/// the cluster converges on the next deploy.
#[tokio::test]
async fn test_set_replicas_before_first_deploy() {
    let ctx = TestContext::new().await;
    ctx.store
        .create_from_manifest(&ctx.module, &web_manifest())
        .await
        .unwrap();

    ctx.scaler
        .set_replicas(&ctx.module, AppEnvName::Prod, "web", 4)
        .await
        .unwrap();
    assert_eq!(
        ctx.scaler
            .get_replicas(&ctx.module, AppEnvName::Prod, "web")
            .await
            .unwrap(),
        4
    );
    assert!(ctx.mock.object(PROD_NS, BKAPP, "demo-app").await.is_none());

    // The next deploy carries the overlay to the cluster.
    let deploy = ctx
        .deployer
        .deploy(ctx.request(AppEnvName::Prod, None, "release-1"))
        .await
        .unwrap();
    assert_eq!(deploy.status, "progressing");
    let bkapp = ctx.mock.object(PROD_NS, BKAPP, "demo-app").await.unwrap();
    assert_eq!(bkapp["spec"]["envOverlay"]["replicas"][0]["count"], 4);
    ctx.finish_deploy(&deploy.id).await;
}
