// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed AppModel manifest.
//!
//! Wire field names are camelCase; the internal representation is snake_case.
//! Every optional field uses `skip_serializing_if` so a serialized manifest
//! never contains null values - this is what makes the deployable form free
//! of nulls without a post-processing pass.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ModelError, Result, ValidationError};

/// API group of the BkApp custom resource.
pub const GROUP: &str = "paas.bk.tencent.com";

/// Kind of the BkApp custom resource.
pub const KIND: &str = "BkApp";

/// Supported API versions of the BkApp custom resource.
///
/// Both versions are accepted on read; emission always uses the server's
/// configured version (default `v1alpha2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ApiVersion {
    /// `paas.bk.tencent.com/v1alpha1`
    V1Alpha1,
    /// `paas.bk.tencent.com/v1alpha2`
    #[default]
    V1Alpha2,
}

impl ApiVersion {
    /// Full `group/version` string as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1Alpha1 => "paas.bk.tencent.com/v1alpha1",
            Self::V1Alpha2 => "paas.bk.tencent.com/v1alpha2",
        }
    }

    /// Bare version tag (`v1alpha1` / `v1alpha2`).
    pub fn version_tag(&self) -> &'static str {
        match self {
            Self::V1Alpha1 => "v1alpha1",
            Self::V1Alpha2 => "v1alpha2",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiVersion {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "paas.bk.tencent.com/v1alpha1" | "v1alpha1" => Ok(Self::V1Alpha1),
            "paas.bk.tencent.com/v1alpha2" | "v1alpha2" => Ok(Self::V1Alpha2),
            other => Err(ValidationError::new(
                "apiVersion",
                format!("unsupported API version '{}'", other),
            )
            .into()),
        }
    }
}

impl Serialize for ApiVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Runtime environment of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnvName {
    /// Staging environment.
    Stag,
    /// Production environment.
    Prod,
}

impl AppEnvName {
    /// Wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stag => "stag",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for AppEnvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppEnvName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stag" => Ok(Self::Stag),
            "prod" => Ok(Self::Prod),
            other => Err(ValidationError::new(
                "environment",
                format!("unknown environment '{}', expected 'stag' or 'prod'", other),
            )
            .into()),
        }
    }
}

/// Object metadata carried by the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Resource name. The store forces this to the application code.
    pub name: String,
    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Server-owned generation counter; stripped from deployable output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

/// One name/value environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// Autoscaling configuration of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingConfig {
    /// Lower replica bound, at least 1.
    pub min_replicas: i32,
    /// Upper replica bound, at least `min_replicas`.
    pub max_replicas: i32,
    /// Scaling policy name, e.g. `default`.
    pub policy: String,
}

/// A named runnable unit within the AppModel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Process name, a DNS label (e.g. `web`, `worker`).
    pub name: String,
    /// Container image; absent when inherited from `spec.build`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Entrypoint override.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Entrypoint arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Container port exposed over HTTP, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,
    /// Desired replica count; resolver default is 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Resource-quota plan token; resolver default is `default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res_quota_plan: Option<String>,
    /// Autoscaling configuration, if enabled in the main spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingConfig>,
    /// Process-level environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Build configuration inherited by processes without an explicit image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Image produced by the platform build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Pull policy for the built image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    /// Name of the credential pair used to pull the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_credentials_name: Option<String>,
}

/// A lifecycle hook command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    /// Hook entrypoint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Hook arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Lifecycle hooks of the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    /// Runs before a release is switched live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_release: Option<Hook>,
}

/// A single addon specification entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonSpec {
    /// Spec key.
    pub name: String,
    /// Spec value.
    pub value: String,
}

/// A platform addon requested by the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Addon {
    /// Addon service name.
    pub name: String,
    /// Addon-specific settings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specs: Vec<AddonSpec>,
}

/// Reference to a named mount source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Name of the source object.
    pub name: String,
}

/// Source of a volume mount - exactly one variant is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSource {
    /// ConfigMap-backed source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<SourceRef>,
    /// PersistentStorage-backed source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_storage: Option<SourceRef>,
}

/// A volume mounted into every process of the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSpec {
    /// Mount name, a DNS label.
    pub name: String,
    /// Absolute path the volume is mounted at.
    pub mount_path: String,
    /// Backing source.
    pub source: MountSource,
    /// Optional sub paths projected from the source.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_paths: Vec<String>,
}

/// One host alias entry for in-pod DNS resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAlias {
    /// IP address the hostnames resolve to.
    pub ip: String,
    /// Hostnames mapped to the IP.
    pub hostnames: Vec<String>,
}

/// Custom DNS configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainResolution {
    /// Nameserver IPs injected into pods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    /// Static host aliases injected into pods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_aliases: Vec<HostAlias>,
}

/// Replica-count override for one `(envName, process)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicasOverlay {
    /// Target environment.
    pub env_name: AppEnvName,
    /// Process being overridden.
    pub process: String,
    /// Replica count in that environment.
    pub count: i32,
}

/// Resource-quota override for one `(envName, process)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResQuotaOverlay {
    /// Target environment.
    pub env_name: AppEnvName,
    /// Process being overridden.
    pub process: String,
    /// Plan token in that environment.
    pub plan: String,
}

/// Autoscaling override for one `(envName, process)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingOverlay {
    /// Target environment.
    pub env_name: AppEnvName,
    /// Process being overridden.
    pub process: String,
    /// Lower replica bound.
    pub min_replicas: i32,
    /// Upper replica bound.
    pub max_replicas: i32,
    /// Scaling policy name.
    pub policy: String,
}

/// Environment-variable override for one `(envName, process)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarOverlay {
    /// Target environment.
    pub env_name: AppEnvName,
    /// Process being overridden.
    pub process: String,
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// Environment-scoped overrides, four parallel arrays keyed by
/// `(envName, process)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvOverlay {
    /// Replica-count overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replicas: Vec<ReplicasOverlay>,
    /// Resource-quota overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub res_quotas: Vec<ResQuotaOverlay>,
    /// Autoscaling overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub autoscaling: Vec<AutoscalingOverlay>,
    /// Environment-variable overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_variables: Vec<EnvVarOverlay>,
}

impl EnvOverlay {
    /// True when no overlay entry of any kind is present.
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
            && self.res_quotas.is_empty()
            && self.autoscaling.is_empty()
            && self.env_variables.is_empty()
    }
}

/// Desired-state section of the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BkAppSpec {
    /// Runnable units of the application.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessSpec>,
    /// Platform build configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    /// Lifecycle hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,
    /// Requested addons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addons: Vec<Addon>,
    /// Volume mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountSpec>,
    /// Custom DNS settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_resolution: Option<DomainResolution>,
    /// Environment-scoped overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_overlay: Option<EnvOverlay>,
}

/// A complete AppModel manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BkAppManifest {
    /// `paas.bk.tencent.com/{v1alpha1|v1alpha2}`.
    pub api_version: ApiVersion,
    /// Always `BkApp`.
    pub kind: String,
    /// Object metadata.
    pub metadata: Metadata,
    /// Desired state.
    pub spec: BkAppSpec,
    /// Read-only reflection of cluster state; stripped from deployable output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

impl BkAppManifest {
    /// Create a minimal manifest for the given application code.
    pub fn new(app_code: &str) -> Self {
        Self {
            api_version: ApiVersion::default(),
            kind: KIND.to_string(),
            metadata: Metadata {
                name: app_code.to_string(),
                ..Default::default()
            },
            spec: BkAppSpec::default(),
            status: None,
        }
    }

    /// Look up a declared process by name.
    pub fn find_process(&self, name: &str) -> Option<&ProcessSpec> {
        self.spec.processes.iter().find(|p| p.name == name)
    }

    /// Whether `name` is declared in `spec.processes`.
    pub fn has_process(&self, name: &str) -> bool {
        self.find_process(name).is_some()
    }

    /// Validate the manifest against the structural rules of the store.
    ///
    /// `app_code` is the owning application's code; `metadata.name` is forced
    /// to it regardless of what the caller supplied. With `strict` set,
    /// overlay entries referencing undeclared processes are an error instead
    /// of being left for the resolver to drop.
    pub fn validate(&mut self, app_code: &str, strict: bool) -> Result<()> {
        if self.kind != KIND {
            return Err(ValidationError::new(
                "kind",
                format!("expected '{}', got '{}'", KIND, self.kind),
            )
            .into());
        }

        // metadata.name is owned by the platform, not the caller.
        self.metadata.name = app_code.to_string();
        validate_dns_name(&self.metadata.name, "metadata.name")?;

        let mut seen = std::collections::HashSet::new();
        for (idx, process) in self.spec.processes.iter().enumerate() {
            let path = format!("spec.processes[{}].name", idx);
            validate_dns_label(&process.name, &path)?;
            if !seen.insert(process.name.as_str()) {
                return Err(ValidationError::new(
                    path,
                    format!("duplicate process name '{}'", process.name),
                )
                .into());
            }
            if let Some(replicas) = process.replicas
                && replicas < 0
            {
                return Err(ValidationError::new(
                    format!("spec.processes[{}].replicas", idx),
                    "replicas must not be negative",
                )
                .into());
            }
            if let Some(ref autoscaling) = process.autoscaling {
                validate_autoscaling(
                    autoscaling.min_replicas,
                    autoscaling.max_replicas,
                    &format!("spec.processes[{}].autoscaling", idx),
                )?;
            }
        }

        if strict && let Some(ref overlay) = self.spec.env_overlay {
            self.validate_overlay_refs(overlay)?;
        }

        Ok(())
    }

    fn validate_overlay_refs(&self, overlay: &EnvOverlay) -> Result<()> {
        let check = |process: &str, path: String| -> Result<()> {
            if self.has_process(process) {
                Ok(())
            } else {
                Err(ValidationError::new(
                    path,
                    format!("references undeclared process '{}'", process),
                )
                .into())
            }
        };
        for (idx, entry) in overlay.replicas.iter().enumerate() {
            check(
                &entry.process,
                format!("spec.envOverlay.replicas[{}].process", idx),
            )?;
        }
        for (idx, entry) in overlay.res_quotas.iter().enumerate() {
            check(
                &entry.process,
                format!("spec.envOverlay.resQuotas[{}].process", idx),
            )?;
        }
        for (idx, entry) in overlay.autoscaling.iter().enumerate() {
            check(
                &entry.process,
                format!("spec.envOverlay.autoscaling[{}].process", idx),
            )?;
        }
        for (idx, entry) in overlay.env_variables.iter().enumerate() {
            check(
                &entry.process,
                format!("spec.envOverlay.envVariables[{}].process", idx),
            )?;
        }
        Ok(())
    }
}

/// Validate autoscaling bounds shared by manifest validation and the scaler.
pub fn validate_autoscaling(min_replicas: i32, max_replicas: i32, path: &str) -> Result<()> {
    if min_replicas < 1 {
        return Err(ValidationError::new(
            format!("{}.minReplicas", path),
            "minReplicas must be at least 1",
        )
        .into());
    }
    if max_replicas < min_replicas {
        return Err(ValidationError::new(
            format!("{}.maxReplicas", path),
            "maxReplicas must not be less than minReplicas",
        )
        .into());
    }
    Ok(())
}

/// Validate a single DNS-1123 label (lowercase alphanumerics and `-`,
/// starting and ending alphanumeric).
pub fn validate_dns_label(value: &str, field_path: &str) -> Result<()> {
    if value.is_empty() || value.len() > 63 {
        return Err(ValidationError::new(
            field_path,
            format!("'{}' must be 1-63 characters", value),
        )
        .into());
    }
    let bytes = value.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return Err(ValidationError::new(
            field_path,
            format!("'{}' must start and end with a lowercase alphanumeric", value),
        )
        .into());
    }
    if !bytes.iter().all(|&b| alnum(b) || b == b'-') {
        return Err(ValidationError::new(
            field_path,
            format!(
                "'{}' may only contain lowercase alphanumerics and '-'",
                value
            ),
        )
        .into());
    }
    Ok(())
}

/// Validate a DNS-safe name: at most 253 characters, dot-separated labels.
pub fn validate_dns_name(value: &str, field_path: &str) -> Result<()> {
    if value.is_empty() || value.len() > 253 {
        return Err(ValidationError::new(
            field_path,
            format!("'{}' must be 1-253 characters", value),
        )
        .into());
    }
    for segment in value.split('.') {
        validate_dns_label(segment, field_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_process_manifest() -> BkAppManifest {
        serde_json::from_value(json!({
            "apiVersion": "paas.bk.tencent.com/v1alpha2",
            "kind": "BkApp",
            "metadata": {"name": "demo"},
            "spec": {
                "processes": [
                    {"name": "web", "replicas": 2, "targetPort": 5000},
                    {"name": "worker", "command": ["python"], "args": ["worker.py"]}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_api_version_round_trip() {
        for (input, expected) in [
            ("paas.bk.tencent.com/v1alpha1", ApiVersion::V1Alpha1),
            ("v1alpha2", ApiVersion::V1Alpha2),
        ] {
            assert_eq!(input.parse::<ApiVersion>().unwrap(), expected);
        }
        assert!("apps/v1".parse::<ApiVersion>().is_err());
        assert_eq!(
            serde_json::to_value(ApiVersion::V1Alpha2).unwrap(),
            json!("paas.bk.tencent.com/v1alpha2")
        );
    }

    #[test]
    fn test_camel_case_wire_names() {
        let manifest = two_process_manifest();
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["spec"]["processes"][0]["targetPort"], json!(5000));
        // Options that are None never serialize as null.
        assert!(
            value["spec"]["processes"][0]
                .as_object()
                .unwrap()
                .get("resQuotaPlan")
                .is_none()
        );
    }

    #[test]
    fn test_validate_forces_metadata_name() {
        let mut manifest = two_process_manifest();
        manifest.metadata.name = "Caller Chosen".to_string();
        manifest.validate("real-app-code", false).unwrap();
        assert_eq!(manifest.metadata.name, "real-app-code");
    }

    #[test]
    fn test_validate_rejects_duplicate_process_names() {
        let mut manifest = two_process_manifest();
        manifest.spec.processes[1].name = "web".to_string();
        let err = manifest.validate("demo", false).unwrap_err();
        let ModelError::Validation(v) = err else {
            panic!("expected validation error");
        };
        assert_eq!(v.field_path, "spec.processes[1].name");
    }

    #[test]
    fn test_validate_rejects_negative_replicas() {
        let mut manifest = two_process_manifest();
        manifest.spec.processes[0].replicas = Some(-1);
        assert!(manifest.validate("demo", false).is_err());
    }

    #[test]
    fn test_strict_validation_rejects_unknown_overlay_process() {
        let mut manifest = two_process_manifest();
        manifest.spec.env_overlay = Some(EnvOverlay {
            replicas: vec![ReplicasOverlay {
                env_name: AppEnvName::Prod,
                process: "ghost".to_string(),
                count: 3,
            }],
            ..Default::default()
        });
        assert!(manifest.clone().validate("demo", false).is_ok());
        let err = manifest.validate("demo", true).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_dns_label_rules() {
        assert!(validate_dns_label("web", "f").is_ok());
        assert!(validate_dns_label("web-1", "f").is_ok());
        assert!(validate_dns_label("-web", "f").is_err());
        assert!(validate_dns_label("web-", "f").is_err());
        assert!(validate_dns_label("Web", "f").is_err());
        assert!(validate_dns_label("", "f").is_err());
        assert!(validate_dns_label(&"a".repeat(64), "f").is_err());
    }

    #[test]
    fn test_dns_name_allows_dotted_segments() {
        assert!(validate_dns_name("demo.example", "f").is_ok());
        assert!(validate_dns_name("demo..example", "f").is_err());
    }

    #[test]
    fn test_autoscaling_bounds() {
        assert!(validate_autoscaling(1, 5, "p").is_ok());
        assert!(validate_autoscaling(0, 5, "p").is_err());
        assert!(validate_autoscaling(3, 2, "p").is_err());
    }
}
