use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use planvis_core::{Broker, ServiceOffering, Visibility};
use planvis_storage::{StorageError, Transaction, TransactionalStorage};
use tokio::sync::{RwLock, Semaphore};

use crate::recorder::{CallLog, Operation, Recorder};
use crate::transaction::{InMemoryTransaction, TransactionState, TransactionStats};

/// Committed catalog and visibility data.
#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    pub(crate) brokers: HashMap<String, Broker>,
    /// Offerings in registration order.
    pub(crate) offerings: Vec<ServiceOffering>,
    pub(crate) visibilities: BTreeMap<String, Visibility>,
}

impl MemoryState {
    pub(crate) fn plan_exists(&self, service_plan_id: &str) -> bool {
        self.offerings
            .iter()
            .flat_map(|offering| offering.plans.iter())
            .any(|plan| plan.id == service_plan_id)
    }

    /// Committed visibilities of a plan, skipping ids in `hidden`.
    pub(crate) fn visibilities_for_plan<'a>(
        &'a self,
        service_plan_id: &'a str,
        hidden: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a Visibility> + 'a {
        self.visibilities
            .values()
            .filter(move |v| v.service_plan_id == service_plan_id && !hidden.contains(&v.id))
    }

    /// Checks the storage constraints for inserting `visibility`, treating ids
    /// in `hidden` as already deleted.
    pub(crate) fn check_insert(
        &self,
        visibility: &Visibility,
        hidden: &BTreeSet<String>,
    ) -> Result<(), StorageError> {
        if !self.plan_exists(&visibility.service_plan_id) {
            return Err(StorageError::not_found(
                "service_plan",
                &visibility.service_plan_id,
            ));
        }

        if self.visibilities.contains_key(&visibility.id) && !hidden.contains(&visibility.id) {
            return Err(StorageError::already_exists("visibility", &visibility.id));
        }

        for existing in self.visibilities_for_plan(&visibility.service_plan_id, hidden) {
            if existing.platform_id != visibility.platform_id {
                continue;
            }
            if visibility.is_public() {
                return Err(StorageError::duplicate_visibility(
                    &visibility.service_plan_id,
                ));
            }
            return Err(StorageError::already_exists(
                "visibility",
                format!("{}/{}", visibility.service_plan_id, visibility.platform_id),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) state: RwLock<MemoryState>,
    /// Plan id -> single-permit lock, held by the transaction with an
    /// uncommitted public visibility for that plan.
    pub(crate) public_claims: DashMap<String, Arc<Semaphore>>,
    pub(crate) recorder: Recorder,
    stats: Mutex<TransactionStats>,
    next_transaction_id: AtomicU64,
}

impl Shared {
    pub(crate) fn record_outcome(&self, state: TransactionState) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(state);
    }

    pub(crate) fn public_claim(&self, service_plan_id: &str) -> Arc<Semaphore> {
        let claim = self
            .public_claims
            .entry(service_plan_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)));
        Arc::clone(&claim)
    }

    fn is_claimed(&self, service_plan_id: &str) -> bool {
        self.public_claims
            .get(service_plan_id)
            .is_some_and(|claim| claim.available_permits() == 0)
    }
}

/// In-memory transactional visibility storage.
///
/// Cloning is cheap and yields a handle to the same data, so clones can be
/// handed to concurrent tasks.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    shared: Arc<Shared>,
}

impl InMemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a broker.
    pub async fn put_broker(&self, broker: Broker) {
        let mut state = self.shared.state.write().await;
        state.brokers.insert(broker.id.clone(), broker);
    }

    /// Registers an offering, replacing any offering with the same id in place.
    pub async fn put_offering(&self, offering: ServiceOffering) {
        let mut state = self.shared.state.write().await;
        match state.offerings.iter_mut().find(|o| o.id == offering.id) {
            Some(existing) => *existing = offering,
            None => state.offerings.push(offering),
        }
    }

    /// Inserts a committed visibility directly, outside any transaction.
    ///
    /// # Errors
    ///
    /// Fails with the same constraint errors as a transactional `create`.
    pub async fn insert_visibility(&self, visibility: Visibility) -> Result<(), StorageError> {
        let mut state = self.shared.state.write().await;
        state.check_insert(&visibility, &BTreeSet::new())?;
        if visibility.is_public() && self.shared.is_claimed(&visibility.service_plan_id) {
            return Err(StorageError::duplicate_visibility(
                &visibility.service_plan_id,
            ));
        }
        state.visibilities.insert(visibility.id.clone(), visibility);
        Ok(())
    }

    /// Committed visibilities of one plan, ordered by id.
    pub async fn visibilities_for_plan(&self, service_plan_id: &str) -> Vec<Visibility> {
        let state = self.shared.state.read().await;
        let none = BTreeSet::new();
        state
            .visibilities_for_plan(service_plan_id, &none)
            .cloned()
            .collect()
    }

    /// All committed visibilities, ordered by id.
    pub async fn all_visibilities(&self) -> Vec<Visibility> {
        let state = self.shared.state.read().await;
        state.visibilities.values().cloned().collect()
    }

    /// Snapshot of every store call recorded so far.
    pub fn calls(&self) -> CallLog {
        self.shared.recorder.snapshot()
    }

    /// Clears the call log and any pending injected failures.
    pub fn reset_calls(&self) {
        self.shared.recorder.reset();
    }

    /// Makes the `nth` upcoming call of `operation` (1-based) fail with
    /// `StorageError::Unavailable`.
    pub fn fail_nth(&self, operation: Operation, nth: usize) {
        self.shared.recorder.fail_nth(operation, nth);
    }

    /// Removes all pending injected failures.
    pub fn clear_faults(&self) {
        self.shared.recorder.clear_faults();
    }

    pub fn transaction_stats(&self) -> TransactionStats {
        self.shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TransactionalStorage for InMemoryStorage {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        let id = self
            .shared
            .next_transaction_id
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        self.shared.record_outcome(TransactionState::Active);
        tracing::trace!(transaction_id = id, "In-memory transaction started");
        Ok(Box::new(InMemoryTransaction::new(
            id,
            Arc::clone(&self.shared),
        )))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
