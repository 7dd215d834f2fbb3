use serde::Serialize;

/// What one reconciliation run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub broker_id: String,
    pub plans_processed: usize,
    /// Ids of created public visibilities.
    pub created: Vec<String>,
    /// Ids of deleted visibilities.
    pub deleted: Vec<String>,
    /// Creates and deletes that were already satisfied by a concurrent writer.
    pub races_absorbed: usize,
}

impl ReconcileReport {
    pub fn new(broker_id: impl Into<String>) -> Self {
        Self {
            broker_id: broker_id.into(),
            ..Default::default()
        }
    }

    /// True when the run issued no successful writes.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}
