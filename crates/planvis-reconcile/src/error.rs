//! Error types for visibility reconciliation.

use planvis_core::CoreError;
use planvis_storage::{ErrorCategory, StorageError};
use thiserror::Error;

/// A policy could not decide whether a plan should be public.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Metadata(#[from] CoreError),

    #[error("metadata flag '{key}' is not set")]
    MissingFlag { key: String },
}

impl PolicyError {
    pub fn missing_flag(key: impl Into<String>) -> Self {
        Self::MissingFlag { key: key.into() }
    }
}

/// A broker reconciliation failed; nothing it did was persisted.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("reconciling visibilities of broker {broker_id}{} failed: {source}", plan_context(.plan_id))]
    Storage {
        broker_id: String,
        plan_id: Option<String>,
        source: StorageError,
    },

    #[error("visibility policy failed for broker {broker_id}, plan {plan_id}: {source}")]
    Policy {
        broker_id: String,
        plan_id: String,
        source: PolicyError,
    },

    #[error("could not generate visibility id for broker {broker_id}, plan {plan_id}: {source}")]
    IdentityGeneration {
        broker_id: String,
        plan_id: String,
        source: CoreError,
    },
}

fn plan_context(plan_id: &Option<String>) -> String {
    plan_id
        .as_ref()
        .map(|id| format!(" (plan {id})"))
        .unwrap_or_default()
}

impl ReconcileError {
    pub fn storage(
        broker_id: impl Into<String>,
        plan_id: Option<&str>,
        source: StorageError,
    ) -> Self {
        Self::Storage {
            broker_id: broker_id.into(),
            plan_id: plan_id.map(str::to_string),
            source,
        }
    }

    pub fn policy(
        broker_id: impl Into<String>,
        plan_id: impl Into<String>,
        source: PolicyError,
    ) -> Self {
        Self::Policy {
            broker_id: broker_id.into(),
            plan_id: plan_id.into(),
            source,
        }
    }

    pub fn identity_generation(
        broker_id: impl Into<String>,
        plan_id: impl Into<String>,
        source: CoreError,
    ) -> Self {
        Self::IdentityGeneration {
            broker_id: broker_id.into(),
            plan_id: plan_id.into(),
            source,
        }
    }

    pub fn broker_id(&self) -> &str {
        match self {
            Self::Storage { broker_id, .. }
            | Self::Policy { broker_id, .. }
            | Self::IdentityGeneration { broker_id, .. } => broker_id,
        }
    }

    /// The plan being processed when the run failed, if any.
    pub fn plan_id(&self) -> Option<&str> {
        match self {
            Self::Storage { plan_id, .. } => plan_id.as_deref(),
            Self::Policy { plan_id, .. } | Self::IdentityGeneration { plan_id, .. } => {
                Some(plan_id)
            }
        }
    }

    /// Category of the underlying storage failure, for logs.
    pub fn storage_category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Storage { source, .. } => Some(source.category()),
            Self::Policy { .. } | Self::IdentityGeneration { .. } => None,
        }
    }

    /// Whether retrying the triggering request may succeed.
    pub fn is_transient(&self) -> bool {
        self.storage_category() == Some(ErrorCategory::Infrastructure)
    }
}
