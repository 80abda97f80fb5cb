// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use bkpaas_model::ApiVersion;

/// bkpaas control-plane configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL.
    pub database_url: String,
    /// Manifest emission version.
    pub api_version: ApiVersion,
    /// Cap for per-process replicas.
    pub default_max_replicas: i32,
    /// Transient cluster error retries.
    pub retry_budget: u32,
    /// Retry backoff base in milliseconds.
    pub retry_base_ms: u64,
    /// Retry backoff multiplication factor.
    pub retry_factor: f64,
    /// Wall-clock budget for a single deploy, in seconds.
    pub deploy_timeout_seconds: u64,
    /// Default storage class for persistent volume claims.
    pub storage_class_name: Option<String>,
    /// Base64-encoded 32-byte key for credential encryption at rest.
    pub secret_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `BKPAAS_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `BKPAAS_API_VERSION`: `v1alpha1` or `v1alpha2` (default: `v1alpha2`)
    /// - `BKPAAS_DEFAULT_MAX_REPLICAS`: replica cap (default: 5)
    /// - `BKPAAS_RETRY_BUDGET`: retries for transient cluster errors (default: 3)
    /// - `BKPAAS_RETRY_BASE_MS`: backoff base in ms (default: 500)
    /// - `BKPAAS_RETRY_FACTOR`: backoff factor (default: 2.0)
    /// - `BKPAAS_DEPLOY_TIMEOUT_SECONDS`: deploy budget (default: 1800)
    /// - `BKPAAS_STORAGE_CLASS_NAME`: default PVC storage class
    /// - `BKPAAS_SECRET_KEY`: base64 32-byte credential encryption key
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("BKPAAS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("BKPAAS_DATABASE_URL"))?;

        let api_version: ApiVersion = std::env::var("BKPAAS_API_VERSION")
            .unwrap_or_else(|_| "v1alpha2".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("BKPAAS_API_VERSION", "must be 'v1alpha1' or 'v1alpha2'")
            })?;

        let default_max_replicas: i32 = std::env::var("BKPAAS_DEFAULT_MAX_REPLICAS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("BKPAAS_DEFAULT_MAX_REPLICAS", "must be a positive integer")
            })?;
        if default_max_replicas < 1 {
            return Err(ConfigError::Invalid(
                "BKPAAS_DEFAULT_MAX_REPLICAS",
                "must be a positive integer",
            ));
        }

        let retry_budget: u32 = std::env::var("BKPAAS_RETRY_BUDGET")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("BKPAAS_RETRY_BUDGET", "must be an integer"))?;

        let retry_base_ms: u64 = std::env::var("BKPAAS_RETRY_BASE_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("BKPAAS_RETRY_BASE_MS", "must be an integer"))?;

        let retry_factor: f64 = std::env::var("BKPAAS_RETRY_FACTOR")
            .unwrap_or_else(|_| "2.0".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("BKPAAS_RETRY_FACTOR", "must be a number"))?;
        if !retry_factor.is_finite() || retry_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "BKPAAS_RETRY_FACTOR",
                "must be a number >= 1.0",
            ));
        }

        let deploy_timeout_seconds: u64 = std::env::var("BKPAAS_DEPLOY_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "1800".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("BKPAAS_DEPLOY_TIMEOUT_SECONDS", "must be an integer")
            })?;

        let storage_class_name = std::env::var("BKPAAS_STORAGE_CLASS_NAME").ok();
        let secret_key = std::env::var("BKPAAS_SECRET_KEY").ok();

        Ok(Self {
            database_url,
            api_version,
            default_max_replicas,
            retry_budget,
            retry_base_ms,
            retry_factor,
            deploy_timeout_seconds,
            storage_class_name,
            secret_key,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            api_version: ApiVersion::V1Alpha2,
            default_max_replicas: 5,
            retry_budget: 3,
            retry_base_ms: 500,
            retry_factor: 2.0,
            deploy_timeout_seconds: 1800,
            storage_class_name: None,
            secret_key: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
