// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the manifest layer.

use std::fmt;

use thiserror::Error;

/// Result type using ModelError.
pub type Result<T> = std::result::Result<T, ModelError>;

/// A single rejected field in a caller-supplied manifest.
///
/// Compiles into one `field_path: message` line so the store can log it
/// without multi-line formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `spec.processes[1].name`.
    pub field_path: String,
    /// Human-readable reason the field was rejected.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for the given field path.
    pub fn new(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field_path, self.message)
    }
}

/// Errors raised by the manifest layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// Caller-supplied manifest was rejected. Never retried.
    #[error("validation failed: {0}")]
    Validation(ValidationError),

    /// Resource-quota plan token is neither a named plan nor `<n>C<m>G`.
    #[error("invalid quota plan: '{0}'")]
    QuotaPlan(String),

    /// A process named by the caller is absent from the manifest.
    #[error("process '{0}' not found in manifest")]
    ProcessNotFound(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ModelError {
    /// Machine-readable kind string, used as the Deploy `reason` when a
    /// manifest error terminates a deploy.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::QuotaPlan(_) => "QuotaPlanError",
            Self::ProcessNotFound(_) => "NotFound",
            Self::Json(_) | Self::Yaml(_) => "ValidationError",
        }
    }
}

impl From<ValidationError> for ModelError {
    fn from(err: ValidationError) -> Self {
        ModelError::Validation(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_single_line() {
        let err = ValidationError::new("spec.processes[1].name", "duplicate process name 'web'");
        assert_eq!(
            err.to_string(),
            "spec.processes[1].name: duplicate process name 'web'"
        );
    }

    #[test]
    fn test_model_error_kinds() {
        let err: ModelError = ValidationError::new("metadata.name", "bad").into();
        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(ModelError::QuotaPlan("9X".into()).kind(), "QuotaPlanError");
        assert_eq!(ModelError::ProcessNotFound("web".into()).kind(), "NotFound");
    }
}
