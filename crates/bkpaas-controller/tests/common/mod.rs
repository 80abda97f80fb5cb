// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared harness for bkpaas-controller integration tests.
//!
//! Wires the full stack - store, tracker, credential store, mounts,
//! reconciler, deployer, scaler - against an in-memory SQLite database and a
//! mock cluster client.

#![allow(dead_code)] // Not every test binary uses every helper

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use uuid::Uuid;

use bkpaas_controller::cluster::{ClientCache, MockResourceClient, ResourceClient, ResourceKind};
use bkpaas_controller::deployer::{DeployLocks, DeployRequest, Deployer};
use bkpaas_controller::procs::ProcSpecReader;
use bkpaas_controller::reconciler::Reconciler;
use bkpaas_controller::scaler::Scaler;
use bkpaas_core::config::Config;
use bkpaas_core::credentials::CredentialStore;
use bkpaas_core::crypto::SecretBox;
use bkpaas_core::mounts::MountManager;
use bkpaas_core::persistence::{EnvClusterRecord, Persistence, SqlitePersistence};
use bkpaas_core::store::{AppModelStore, ModuleRef};
use bkpaas_core::tracker::{DeployStatus, DeployTracker};
use bkpaas_model::ApiVersion;

/// 32 zero bytes, base64-encoded. Test-only encryption key.
pub const TEST_SECRET_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

/// Namespace of the prod environment in the test cluster.
pub const PROD_NS: &str = "bkapp-demo-app-prod";

/// Namespace of the stag environment in the test cluster.
pub const STAG_NS: &str = "bkapp-demo-app-stag";

/// The BkApp resource kind at the emission version used in tests.
pub const BKAPP: ResourceKind = ResourceKind::BkApp(ApiVersion::V1Alpha2);

/// Fully wired test stack.
pub struct TestContext {
    pub persistence: Arc<dyn Persistence>,
    pub store: Arc<AppModelStore>,
    pub tracker: Arc<DeployTracker>,
    pub credentials: Arc<CredentialStore>,
    pub mock: Arc<MockResourceClient>,
    pub reconciler: Arc<Reconciler>,
    pub locks: Arc<DeployLocks>,
    pub deployer: Deployer,
    pub scaler: Scaler,
    pub procs: ProcSpecReader,
    pub module: ModuleRef,
}

impl TestContext {
    /// Build the stack with the default test configuration.
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Build the stack with a custom configuration.
    pub async fn with_config(config: Config) -> Self {
        let persistence: Arc<dyn Persistence> = Arc::new(
            SqlitePersistence::in_memory()
                .await
                .expect("failed to open in-memory database"),
        );

        let module = ModuleRef {
            application_id: "app-0001".to_string(),
            module_id: "module-0001".to_string(),
            app_code: "demo-app".to_string(),
            tenant_id: "default".to_string(),
        };

        // Both environments bind to the same test cluster, distinct
        // namespaces.
        for (env, namespace) in [("stag", STAG_NS), ("prod", PROD_NS)] {
            persistence
                .upsert_env_cluster(&EnvClusterRecord {
                    id: Uuid::new_v4().to_string(),
                    tenant_id: "default".to_string(),
                    application_id: module.application_id.clone(),
                    environment: env.to_string(),
                    cluster_name: "test-cluster".to_string(),
                    api_server_url: "https://127.0.0.1:6443".to_string(),
                    token_encrypted: None,
                    ca_data: None,
                    namespace: namespace.to_string(),
                })
                .await
                .expect("failed to bind cluster");
        }

        let mock = Arc::new(MockResourceClient::new());
        let cache = Arc::new(ClientCache::new());
        cache.insert("test-cluster", mock.clone() as Arc<dyn ResourceClient>);

        let store = Arc::new(AppModelStore::new(persistence.clone(), config.api_version));
        let tracker = Arc::new(DeployTracker::new(persistence.clone()));
        let credentials = Arc::new(CredentialStore::new(
            persistence.clone(),
            SecretBox::new(TEST_SECRET_KEY).expect("test key is valid"),
        ));
        let mounts = Arc::new(MountManager::new(persistence.clone()));
        let reconciler = Arc::new(Reconciler::new(
            persistence.clone(),
            credentials.clone(),
            mounts,
            cache,
            &config,
        ));
        let locks = Arc::new(DeployLocks::new());
        let deployer = Deployer::new(
            store.clone(),
            tracker.clone(),
            reconciler.clone(),
            locks.clone(),
            &config,
        );
        let scaler = Scaler::new(
            store.clone(),
            reconciler.clone(),
            locks.clone(),
            config.default_max_replicas,
        );
        let procs = ProcSpecReader::new(store.clone(), config.default_max_replicas);

        Self {
            persistence,
            store,
            tracker,
            credentials,
            mock,
            reconciler,
            locks,
            deployer,
            scaler,
            procs,
            module,
        }
    }

    /// A deploy request for the module with a given manifest and name.
    pub fn request(&self, env: bkpaas_model::AppEnvName, manifest: Option<Value>, name: &str) -> DeployRequest {
        DeployRequest {
            module: self.module.clone(),
            environment: env,
            manifest,
            operator: "admin".to_string(),
            name: Some(name.to_string()),
        }
    }

    /// Play the external watcher: drive a deploy to READY and give the lock
    /// release task a tick to run.
    pub async fn finish_deploy(&self, deploy_id: &str) {
        self.tracker
            .transition(
                deploy_id,
                DeployStatus::Ready,
                Some("AppAvailable"),
                Some("all processes are running"),
            )
            .await
            .expect("failed to finish deploy");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Test configuration: fast retries, generous deploy budget.
pub fn test_config() -> Config {
    Config {
        retry_base_ms: 1,
        deploy_timeout_seconds: 300,
        secret_key: Some(TEST_SECRET_KEY.to_string()),
        ..Default::default()
    }
}

/// The first-deploy manifest: one `web` process, two replicas, plan 4C1G.
pub fn web_manifest() -> Value {
    json!({
        "apiVersion": "paas.bk.tencent.com/v1alpha2",
        "kind": "BkApp",
        "metadata": {"name": "demo-app"},
        "spec": {
            "processes": [
                {"name": "web", "replicas": 2, "resQuotaPlan": "4C1G", "targetPort": 5000}
            ]
        }
    })
}
