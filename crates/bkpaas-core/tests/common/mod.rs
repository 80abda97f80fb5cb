// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for bkpaas-core integration tests.

#![allow(dead_code)] // Not every test binary uses every helper

use std::sync::Arc;

use serde_json::{Value, json};

use bkpaas_core::persistence::{Persistence, SqlitePersistence};
use bkpaas_core::store::ModuleRef;

/// 32 zero bytes, base64-encoded. Test-only encryption key.
pub const TEST_SECRET_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

/// Fresh in-memory database.
pub async fn persistence() -> Arc<dyn Persistence> {
    Arc::new(
        SqlitePersistence::in_memory()
            .await
            .expect("failed to open in-memory database"),
    )
}

/// A module reference for the `demo-app` application.
pub fn demo_module() -> ModuleRef {
    ModuleRef {
        application_id: "app-0001".to_string(),
        module_id: "module-0001".to_string(),
        app_code: "demo-app".to_string(),
        tenant_id: "default".to_string(),
    }
}

/// A manifest with one `web` process, as in the first-deploy scenario.
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
