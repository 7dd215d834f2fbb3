//! Broker catalog snapshot types.

use serde::{Deserialize, Serialize};

use crate::metadata::PlanMetadata;

/// A registered service broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broker {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl Broker {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A named group of plans advertised by one broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: String,
    pub name: String,
    pub broker_id: String,
    /// Plans in catalog order.
    #[serde(default)]
    pub plans: Vec<ServicePlan>,
}

impl ServiceOffering {
    pub fn new(id: impl Into<String>, name: impl Into<String>, broker_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            broker_id: broker_id.into(),
            plans: Vec::new(),
        }
    }

    /// Appends a plan, re-parenting it onto this offering.
    #[must_use]
    pub fn with_plan(mut self, mut plan: ServicePlan) -> Self {
        plan.service_offering_id = self.id.clone();
        self.plans.push(plan);
        self
    }
}

/// The unit a visibility grant applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePlan {
    /// Stable across reconciliations.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub service_offering_id: String,
    #[serde(default)]
    pub metadata: PlanMetadata,
}

impl ServicePlan {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            service_offering_id: String::new(),
            metadata: PlanMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: PlanMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}
