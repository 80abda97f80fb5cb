// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manifest rendering: wire JSON/YAML to typed manifests and back.
//!
//! The renderer produces the *deployable* form of a manifest: all null-valued
//! fields omitted, the `status` subtree stripped, `metadata.generation`
//! removed (Kubernetes owns it) and `apiVersion` rewritten to the server's
//! configured emission version.
//!
//! Unknown input fields are rejected on the write path (`parse_strict`) so a
//! typo never silently disappears into a revision; they are tolerated on
//! read-back of previously deployed manifests (`parse_lenient`), where the
//! cluster may have added fields this build does not know.

use serde_json::Value;

use crate::error::{Result, ValidationError};
use crate::manifest::{ApiVersion, BkAppManifest};

/// Renders manifests for a configured emission version.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    emit_version: ApiVersion,
}

impl Renderer {
    /// Create a renderer emitting the given API version.
    pub fn new(emit_version: ApiVersion) -> Self {
        Self { emit_version }
    }

    /// The API version this renderer emits.
    pub fn emit_version(&self) -> ApiVersion {
        self.emit_version
    }

    /// Parse a manifest for the write path: unknown fields are an error.
    pub fn parse_strict(&self, input: &Value) -> Result<BkAppManifest> {
        let manifest: BkAppManifest = serde_json::from_value(input.clone())?;
        let canonical = serde_json::to_value(&manifest)?;
        if let Some(path) = first_unknown_field(input, &canonical, "") {
            return Err(ValidationError::new(path, "unknown field").into());
        }
        Ok(manifest)
    }

    /// Parse a manifest tolerating fields this build does not know.
    pub fn parse_lenient(&self, input: &Value) -> Result<BkAppManifest> {
        Ok(serde_json::from_value(input.clone())?)
    }

    /// Produce the deployable manifest value.
    ///
    /// Deterministic and idempotent: rendering a rendered manifest yields the
    /// same value.
    pub fn to_deployable(&self, manifest: &BkAppManifest) -> Result<Value> {
        let mut out = manifest.clone();
        out.api_version = self.emit_version;
        out.status = None;
        out.metadata.generation = None;
        Ok(serde_json::to_value(&out)?)
    }

    /// Canonical JSON string of the deployable manifest.
    pub fn to_canonical_json(&self, manifest: &BkAppManifest) -> Result<String> {
        Ok(serde_json::to_string(&self.to_deployable(manifest)?)?)
    }

    /// Block-style YAML of the deployable manifest.
    ///
    /// Loading the YAML yields exactly the canonical JSON value, Unicode
    /// preserved.
    pub fn to_yaml(&self, manifest: &BkAppManifest) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_deployable(manifest)?)?)
    }
}

/// Walk `input` against `canonical` and return the path of the first field
/// present in the input but absent from the canonical serialization.
///
/// Null-valued input fields are skipped: they carry no information and the
/// deployable form drops them anyway. `status` and `metadata.generation` are
/// server-owned and accepted on input.
fn first_unknown_field(input: &Value, canonical: &Value, path: &str) -> Option<String> {
    match (input, canonical) {
        (Value::Object(input_map), Value::Object(canonical_map)) => {
            for (key, input_value) in input_map {
                if input_value.is_null() {
                    continue;
                }
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                match canonical_map.get(key) {
                    Some(canonical_value) => {
                        if let Some(found) =
                            first_unknown_field(input_value, canonical_value, &child_path)
                        {
                            return Some(found);
                        }
                    }
                    // The typed structs serialize empty collections away;
                    // an empty input container is not unknown, just empty.
                    None if is_empty_container(input_value) => continue,
                    None if is_server_owned(&child_path) => continue,
                    None => return Some(child_path),
                }
            }
            None
        }
        (Value::Array(input_items), Value::Array(canonical_items)) => input_items
            .iter()
            .zip(canonical_items)
            .enumerate()
            .find_map(|(idx, (i, c))| {
                first_unknown_field(i, c, &format!("{}[{}]", path, idx))
            }),
        _ => None,
    }
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn is_server_owned(path: &str) -> bool {
    path == "status" || path == "metadata.generation"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use serde_json::json;

    fn input() -> Value {
        json!({
            "apiVersion": "paas.bk.tencent.com/v1alpha1",
            "kind": "BkApp",
            "metadata": {"name": "demo", "generation": 3},
            "spec": {
                "processes": [
                    {"name": "web", "replicas": 2, "resQuotaPlan": "4C1G", "targetPort": 5000}
                ]
            },
            "status": {"phase": "Running"}
        })
    }

    #[test]
    fn test_deployable_strips_status_and_generation() {
        let renderer = Renderer::new(ApiVersion::V1Alpha2);
        let manifest = renderer.parse_strict(&input()).unwrap();
        let deployable = renderer.to_deployable(&manifest).unwrap();

        assert_eq!(deployable["apiVersion"], json!("paas.bk.tencent.com/v1alpha2"));
        assert!(deployable.get("status").is_none());
        assert!(deployable["metadata"].get("generation").is_none());
    }

    #[test]
    fn test_render_is_idempotent() {
        let renderer = Renderer::new(ApiVersion::V1Alpha2);
        let manifest = renderer.parse_strict(&input()).unwrap();
        let once = renderer.to_deployable(&manifest).unwrap();
        let twice = renderer
            .to_deployable(&renderer.parse_strict(&once).unwrap())
            .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_accepts_either_version_on_read() {
        let renderer = Renderer::new(ApiVersion::V1Alpha2);
        for version in ["paas.bk.tencent.com/v1alpha1", "paas.bk.tencent.com/v1alpha2"] {
            let mut value = input();
            value["apiVersion"] = json!(version);
            assert!(renderer.parse_strict(&value).is_ok(), "version {}", version);
        }
    }

    #[test]
    fn test_strict_rejects_unknown_fields() {
        let renderer = Renderer::new(ApiVersion::V1Alpha2);
        let mut value = input();
        value["spec"]["processes"][0]["replicaz"] = json!(3);
        let err = renderer.parse_strict(&value).unwrap_err();
        let ModelError::Validation(v) = err else {
            panic!("expected validation error");
        };
        assert_eq!(v.field_path, "spec.processes[0].replicaz");

        // The lenient path tolerates the same input.
        assert!(renderer.parse_lenient(&value).is_ok());
    }

    #[test]
    fn test_strict_tolerates_null_and_empty_fields() {
        let renderer = Renderer::new(ApiVersion::V1Alpha2);
        let mut value = input();
        value["spec"]["processes"][0]["targetPort"] = Value::Null;
        value["spec"]["processes"][0]["command"] = json!([]);
        value["metadata"]["annotations"] = json!({});
        assert!(renderer.parse_strict(&value).is_ok());
    }

    #[test]
    fn test_yaml_round_trips_to_canonical_json() {
        let renderer = Renderer::new(ApiVersion::V1Alpha2);
        let mut value = input();
        // Unicode must survive the YAML round trip.
        value["metadata"]["annotations"] = json!({"description": "蓝鲸应用"});
        let manifest = renderer.parse_strict(&value).unwrap();

        let yaml = renderer.to_yaml(&manifest).unwrap();
        let from_yaml: Value = serde_yaml::from_str(&yaml).unwrap();
        let from_json: Value =
            serde_json::from_str(&renderer.to_canonical_json(&manifest).unwrap()).unwrap();
        assert_eq!(from_yaml, from_json);
        // Block style, not flow style.
        assert!(!yaml.contains('{'));
        assert!(yaml.contains("蓝鲸应用"));
    }
}
