//! Visibility policies decide which plans are public.

use planvis_core::{Broker, ServiceOffering, ServicePlan};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Metadata key read by [`MetadataFlagPolicy::default`].
pub const DEFAULT_METADATA_KEY: &str = "complementary";

/// Decides whether a plan should be visible to everyone.
///
/// Implementations must be deterministic and free of side effects: the
/// reconciler may call them any number of times for the same plan.
pub trait VisibilityPolicy: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`PolicyError`] when no definite decision can be made for
    /// the plan. The reconciliation run is aborted in that case.
    fn is_public(
        &self,
        broker: &Broker,
        offering: &ServiceOffering,
        plan: &ServicePlan,
    ) -> Result<bool, PolicyError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// What to do when the metadata flag is not set on a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentFlag {
    /// Treat the plan as not public.
    #[default]
    NotPublic,
    /// Fail the run with [`PolicyError::MissingFlag`].
    Reject,
}

/// Marks a plan public when a boolean flag in its metadata is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFlagPolicy {
    key: String,
    absent: AbsentFlag,
}

impl MetadataFlagPolicy {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            absent: AbsentFlag::default(),
        }
    }

    #[must_use]
    pub fn with_absent(mut self, absent: AbsentFlag) -> Self {
        self.absent = absent;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Default for MetadataFlagPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_KEY)
    }
}

impl VisibilityPolicy for MetadataFlagPolicy {
    fn is_public(
        &self,
        _broker: &Broker,
        _offering: &ServiceOffering,
        plan: &ServicePlan,
    ) -> Result<bool, PolicyError> {
        let flag = plan.metadata.flag(&self.key)?;
        if flag.is_absent() && self.absent == AbsentFlag::Reject {
            return Err(PolicyError::missing_flag(&self.key));
        }
        Ok(flag.value_or(false))
    }

    fn name(&self) -> &str {
        "metadata_flag"
    }
}

/// Adapts a closure into a policy.
pub struct FnPolicy<F> {
    name: String,
    decide: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(&Broker, &ServiceOffering, &ServicePlan) -> Result<bool, PolicyError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, decide: F) -> Self {
        Self {
            name: name.into(),
            decide,
        }
    }
}

impl<F> VisibilityPolicy for FnPolicy<F>
where
    F: Fn(&Broker, &ServiceOffering, &ServicePlan) -> Result<bool, PolicyError> + Send + Sync,
{
    fn is_public(
        &self,
        broker: &Broker,
        offering: &ServiceOffering,
        plan: &ServicePlan,
    ) -> Result<bool, PolicyError> {
        (self.decide)(broker, offering, plan)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
