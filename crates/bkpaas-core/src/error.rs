// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for bkpaas-core.
//!
//! Every error maps to a kind string via [`CoreError::kind`]; the deploy
//! orchestrator records that string as the terminal Deploy `reason`.

use bkpaas_model::ModelError;
use thiserror::Error;

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors raised by stores and the deploy tracker.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Caller-supplied payload was rejected. Never retried.
    #[error("validation failed for '{field_path}': {message}")]
    Validation {
        /// Dotted path of the offending field.
        field_path: String,
        /// Reason the field was rejected.
        message: String,
    },

    /// A resource (application, module, process, deploy, source) is absent.
    #[error("{resource} '{id}' not found")]
    NotFound {
        /// Resource kind, e.g. `module`, `deploy`, `mount source`.
        resource: &'static str,
        /// Identifier the caller supplied.
        id: String,
    },

    /// Concurrent modification detected.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Another deploy is in flight for the same (application, module, env).
    #[error("a deploy is already in progress for module '{module_id}' env '{environment}'")]
    DeployLockHeld {
        /// Module being deployed.
        module_id: String,
        /// Target environment.
        environment: String,
    },

    /// Resource-quota plan token is invalid.
    #[error("invalid quota plan: '{0}'")]
    QuotaPlan(String),

    /// Wall-clock budget exhausted.
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// Credential encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Database operation failed.
    #[error("database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Manifest-layer error.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl CoreError {
    /// Machine-readable kind string for this error.
    ///
    /// Used as the Deploy `reason` when an error terminates a deploy, and as
    /// a stable code for callers that match on error classes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::NotFound { .. } => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::DeployLockHeld { .. } => "DeployLockHeld",
            Self::QuotaPlan(_) => "QuotaPlanError",
            Self::Timeout(_) => "Timeout",
            Self::Crypto(_) => "CryptoError",
            Self::Database { .. } => "DatabaseError",
            Self::Model(err) => err.kind(),
        }
    }

    /// Shorthand for a validation error.
    pub fn validation(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field_path: field_path.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a not-found error.
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
