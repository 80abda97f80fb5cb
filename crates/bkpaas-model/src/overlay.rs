// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment overlay resolution.
//!
//! For each per-process attribute the effective value is, highest precedence
//! first:
//!
//! 1. the `spec.envOverlay` entry matching `(envName, process)`
//! 2. the value on `spec.processes[p]`
//! 3. the component default (`replicas = 1`, plan `default`, no autoscaling)
//!
//! Duplicate overlay entries for one `(envName, process)` pair are not legal
//! input; the resolver keeps the last one in input order and logs a warning.
//! Entries referencing an undeclared process are dropped silently.

use tracing::warn;

use crate::error::{ModelError, Result};
use crate::manifest::{
    AppEnvName, AutoscalingConfig, BkAppManifest, EnvOverlay, EnvVar, ProcessSpec,
};
use crate::quota;

/// Replica count used when neither overlay nor process declares one.
pub const DEFAULT_REPLICAS: i32 = 1;

/// Resolves effective per-process values for one manifest.
pub struct OverlayResolver<'a> {
    manifest: &'a BkAppManifest,
}

impl<'a> OverlayResolver<'a> {
    /// Create a resolver over the given manifest.
    pub fn new(manifest: &'a BkAppManifest) -> Self {
        Self { manifest }
    }

    fn process(&self, name: &str) -> Result<&'a ProcessSpec> {
        self.manifest
            .find_process(name)
            .ok_or_else(|| ModelError::ProcessNotFound(name.to_string()))
    }

    fn overlay(&self) -> Option<&'a EnvOverlay> {
        self.manifest.spec.env_overlay.as_ref()
    }

    /// Effective replica count for `(env, process)`.
    pub fn replicas(&self, env: AppEnvName, process: &str) -> Result<i32> {
        let main = self.process(process)?.replicas;
        let overlay = self.overlay().and_then(|o| {
            last_match(&o.replicas, env, process, "replicas", |e| {
                (e.env_name, e.process.as_str())
            })
            .map(|e| e.count)
        });
        Ok(overlay.or(main).unwrap_or(DEFAULT_REPLICAS))
    }

    /// Effective resource-quota plan token for `(env, process)`.
    pub fn quota_plan(&self, env: AppEnvName, process: &str) -> Result<String> {
        let main = self.process(process)?.res_quota_plan.clone();
        let overlay = self.overlay().and_then(|o| {
            last_match(&o.res_quotas, env, process, "resQuotas", |e| {
                (e.env_name, e.process.as_str())
            })
            .map(|e| e.plan.clone())
        });
        Ok(overlay
            .or(main)
            .unwrap_or_else(|| quota::DEFAULT_PLAN.to_string()))
    }

    /// Effective autoscaling configuration for `(env, process)`, if any.
    pub fn autoscaling(&self, env: AppEnvName, process: &str) -> Result<Option<AutoscalingConfig>> {
        let main = self.process(process)?.autoscaling.clone();
        let overlay = self.overlay().and_then(|o| {
            last_match(&o.autoscaling, env, process, "autoscaling", |e| {
                (e.env_name, e.process.as_str())
            })
            .map(|e| AutoscalingConfig {
                min_replicas: e.min_replicas,
                max_replicas: e.max_replicas,
                policy: e.policy.clone(),
            })
        });
        Ok(overlay.or(main))
    }

    /// Effective environment variables for `(env, process)`.
    ///
    /// Overlay entries override main entries by `name`; overlay-only entries
    /// are appended after the main list, preserving input order.
    pub fn env_vars(&self, env: AppEnvName, process: &str) -> Result<Vec<EnvVar>> {
        let mut vars = self.process(process)?.env.clone();
        let Some(overlay) = self.overlay() else {
            return Ok(vars);
        };
        for entry in overlay
            .env_variables
            .iter()
            .filter(|e| e.env_name == env && e.process == process)
        {
            match vars.iter_mut().find(|v| v.name == entry.name) {
                Some(existing) => existing.value = entry.value.clone(),
                None => vars.push(EnvVar {
                    name: entry.name.clone(),
                    value: entry.value.clone(),
                }),
            }
        }
        Ok(vars)
    }
}

/// Return the last entry matching `(env, process)`, warning when more than
/// one matched.
fn last_match<'e, T>(
    entries: &'e [T],
    env: AppEnvName,
    process: &str,
    attr: &str,
    key: impl Fn(&T) -> (AppEnvName, &str),
) -> Option<&'e T> {
    let mut matched = entries.iter().filter(|e| key(e) == (env, process));
    let first = matched.next()?;
    match matched.last() {
        Some(last) => {
            warn!(
                env = %env,
                process = %process,
                attr = %attr,
                "duplicate envOverlay entries for the same (envName, process); keeping the last"
            );
            Some(last)
        }
        None => Some(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AutoscalingOverlay, EnvVarOverlay, ReplicasOverlay, ResQuotaOverlay};
    use serde_json::json;

    fn manifest() -> BkAppManifest {
        serde_json::from_value(json!({
            "apiVersion": "paas.bk.tencent.com/v1alpha2",
            "kind": "BkApp",
            "metadata": {"name": "demo"},
            "spec": {
                "processes": [
                    {
                        "name": "web",
                        "replicas": 2,
                        "resQuotaPlan": "4C1G",
                        "env": [{"name": "LOG_LEVEL", "value": "info"}]
                    },
                    {"name": "worker"}
                ],
                "envOverlay": {
                    "replicas": [
                        {"envName": "prod", "process": "web", "count": 5}
                    ],
                    "resQuotas": [
                        {"envName": "prod", "process": "web", "plan": "4C4G"}
                    ],
                    "envVariables": [
                        {"envName": "prod", "process": "web", "name": "LOG_LEVEL", "value": "warn"},
                        {"envName": "prod", "process": "web", "name": "REGION", "value": "eu"}
                    ]
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_overlay_beats_main_beats_default() {
        let m = manifest();
        let resolver = OverlayResolver::new(&m);
        // Overlay value for prod.
        assert_eq!(resolver.replicas(AppEnvName::Prod, "web").unwrap(), 5);
        // Main value when no overlay matches the env.
        assert_eq!(resolver.replicas(AppEnvName::Stag, "web").unwrap(), 2);
        // Component default when the process declares nothing.
        assert_eq!(resolver.replicas(AppEnvName::Prod, "worker").unwrap(), 1);
    }

    #[test]
    fn test_quota_plan_precedence() {
        let m = manifest();
        let resolver = OverlayResolver::new(&m);
        assert_eq!(resolver.quota_plan(AppEnvName::Prod, "web").unwrap(), "4C4G");
        assert_eq!(resolver.quota_plan(AppEnvName::Stag, "web").unwrap(), "4C1G");
        assert_eq!(
            resolver.quota_plan(AppEnvName::Stag, "worker").unwrap(),
            "default"
        );
    }

    #[test]
    fn test_env_vars_override_and_append() {
        let m = manifest();
        let resolver = OverlayResolver::new(&m);
        let vars = resolver.env_vars(AppEnvName::Prod, "web").unwrap();
        assert_eq!(
            vars,
            vec![
                EnvVar {
                    name: "LOG_LEVEL".into(),
                    value: "warn".into()
                },
                EnvVar {
                    name: "REGION".into(),
                    value: "eu".into()
                },
            ]
        );
        // Stag sees only the main list.
        let vars = resolver.env_vars(AppEnvName::Stag, "web").unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].value, "info");
    }

    #[test]
    fn test_duplicate_overlay_last_wins() {
        let mut m = manifest();
        m.spec
            .env_overlay
            .as_mut()
            .unwrap()
            .replicas
            .push(ReplicasOverlay {
                env_name: AppEnvName::Prod,
                process: "web".into(),
                count: 9,
            });
        let resolver = OverlayResolver::new(&m);
        assert_eq!(resolver.replicas(AppEnvName::Prod, "web").unwrap(), 9);
    }

    #[test]
    fn test_unknown_process_is_not_found() {
        let m = manifest();
        let resolver = OverlayResolver::new(&m);
        assert!(matches!(
            resolver.replicas(AppEnvName::Prod, "ghost"),
            Err(ModelError::ProcessNotFound(_))
        ));
    }

    #[test]
    fn test_overlay_for_undeclared_process_is_ignored() {
        let mut m = manifest();
        m.spec
            .env_overlay
            .as_mut()
            .unwrap()
            .res_quotas
            .push(ResQuotaOverlay {
                env_name: AppEnvName::Prod,
                process: "ghost".into(),
                plan: "4C4G".into(),
            });
        let resolver = OverlayResolver::new(&m);
        // Declared processes are unaffected by the stray entry.
        assert_eq!(resolver.quota_plan(AppEnvName::Prod, "web").unwrap(), "4C4G");
        assert_eq!(
            resolver.quota_plan(AppEnvName::Prod, "worker").unwrap(),
            "default"
        );
    }

    #[test]
    fn test_autoscaling_overlay() {
        let mut m = manifest();
        m.spec
            .env_overlay
            .as_mut()
            .unwrap()
            .autoscaling
            .push(AutoscalingOverlay {
                env_name: AppEnvName::Prod,
                process: "web".into(),
                min_replicas: 2,
                max_replicas: 6,
                policy: "default".into(),
            });
        let resolver = OverlayResolver::new(&m);
        let config = resolver.autoscaling(AppEnvName::Prod, "web").unwrap().unwrap();
        assert_eq!(config.min_replicas, 2);
        assert_eq!(config.max_replicas, 6);
        assert!(resolver.autoscaling(AppEnvName::Stag, "web").unwrap().is_none());
    }

    #[test]
    fn test_env_var_overlay_scoped_to_process() {
        let mut m = manifest();
        m.spec
            .env_overlay
            .as_mut()
            .unwrap()
            .env_variables
            .push(EnvVarOverlay {
                env_name: AppEnvName::Prod,
                process: "worker".into(),
                name: "QUEUE".into(),
                value: "high".into(),
            });
        let resolver = OverlayResolver::new(&m);
        let worker_vars = resolver.env_vars(AppEnvName::Prod, "worker").unwrap();
        assert_eq!(worker_vars.len(), 1);
        assert_eq!(worker_vars[0].name, "QUEUE");
        // web does not see worker's overlay entry.
        let web_vars = resolver.env_vars(AppEnvName::Prod, "web").unwrap();
        assert!(web_vars.iter().all(|v| v.name != "QUEUE"));
    }
}
