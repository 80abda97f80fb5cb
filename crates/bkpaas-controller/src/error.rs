// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the controller layer.

use thiserror::Error;

use bkpaas_core::error::CoreError;
use bkpaas_model::ModelError;

use crate::cluster::ClusterError;

/// Result type using ControllerError.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors raised by the reconciler, scaler and deploy orchestrator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControllerError {
    /// Core store/tracker error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Cluster API error.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The environment has no `BkApp` CR yet.
    #[error("no manifest deployed for environment '{0}'")]
    NotDeployed(String),

    /// A derived resource failed to apply; the whole operation failed.
    #[error("partial apply failed: {failed}")]
    PartialApply {
        /// Description of the resource that failed.
        failed: String,
    },

    /// The deploy was cancelled by caller request.
    #[error("deploy cancelled")]
    Cancelled,

    /// The deploy exceeded its wall-clock budget.
    #[error("deploy timed out after {0} seconds")]
    Timeout(u64),
}

impl ControllerError {
    /// Machine-readable kind string, recorded as the Deploy `reason` when an
    /// error terminates a deploy.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Core(err) => err.kind(),
            Self::Cluster(err) => {
                if err.is_transient() {
                    "TransientClusterError"
                } else {
                    "PermanentClusterError"
                }
            }
            Self::NotDeployed(_) => "NotDeployed",
            Self::PartialApply { .. } => "PartialApplyFailed",
            Self::Cancelled => "Cancelled",
            Self::Timeout(_) => "Timeout",
        }
    }
}

impl From<ModelError> for ControllerError {
    fn from(err: ModelError) -> Self {
        Self::Core(CoreError::Model(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(
            ControllerError::PartialApply {
                failed: "Service web".into()
            }
            .kind(),
            "PartialApplyFailed"
        );
        assert_eq!(ControllerError::Cancelled.kind(), "Cancelled");
        assert_eq!(ControllerError::Timeout(1800).kind(), "Timeout");
        assert_eq!(
            ControllerError::NotDeployed("prod".into()).kind(),
            "NotDeployed"
        );
    }

    #[test]
    fn test_cluster_error_classification() {
        let transient: ControllerError = ClusterError::Api {
            status: 503,
            message: "unavailable".into(),
        }
        .into();
        assert_eq!(transient.kind(), "TransientClusterError");

        let permanent: ControllerError = ClusterError::Api {
            status: 422,
            message: "invalid".into(),
        }
        .into();
        assert_eq!(permanent.kind(), "PermanentClusterError");
    }
}
