//! Buffered in-memory transactions.
//!
//! Writes are staged on the transaction and only applied to the shared
//! state on commit, under a single write lock. Reads see committed data
//! overlaid with the transaction's own staged writes.
//!
//! A staged public visibility claims its plan in `Shared::public_claims`
//! until the transaction ends. A second transaction creating a public
//! visibility for the same plan waits for the claim, then checks committed
//! data again: it gets `DuplicateVisibility` if the holder committed, and
//! proceeds if the holder rolled back.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use planvis_core::{Broker, ServiceOffering, Visibility};
use planvis_storage::{CatalogStore, StorageError, Transaction, VisibilityStore};
use tokio::sync::OwnedSemaphorePermit;

use crate::recorder::Operation;
use crate::storage::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
    Failed,
}

/// Counters of transaction outcomes over the life of a storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub failed: u64,
}

impl TransactionStats {
    pub fn record(&mut self, state: TransactionState) {
        match state {
            TransactionState::Active => self.begun += 1,
            TransactionState::Committed => self.committed += 1,
            TransactionState::RolledBack => self.rolled_back += 1,
            TransactionState::Failed => self.failed += 1,
        }
    }

    /// Transactions begun but not yet finished.
    pub fn open(&self) -> u64 {
        self.begun
            .saturating_sub(self.committed + self.rolled_back + self.failed)
    }
}

pub struct InMemoryTransaction {
    id: u64,
    shared: Arc<Shared>,
    staged_creates: Vec<Visibility>,
    staged_deletes: BTreeSet<String>,
    /// Public claims held, by plan id.
    claims: Vec<(String, OwnedSemaphorePermit)>,
    state: TransactionState,
}

impl InMemoryTransaction {
    pub(crate) fn new(id: u64, shared: Arc<Shared>) -> Self {
        Self {
            id,
            shared,
            staged_creates: Vec::new(),
            staged_deletes: BTreeSet::new(),
            claims: Vec::new(),
            state: TransactionState::Active,
        }
    }

    /// Number of staged creates and deletes.
    pub fn pending_writes(&self) -> usize {
        self.staged_creates.len() + self.staged_deletes.len()
    }

    fn holds_claim(&self, service_plan_id: &str) -> bool {
        self.claims.iter().any(|(plan, _)| plan == service_plan_id)
    }

    /// Takes the public claim on a plan, waiting while another transaction
    /// holds it.
    async fn acquire_claim(
        &self,
        service_plan_id: &str,
    ) -> Result<OwnedSemaphorePermit, StorageError> {
        let claim = self.shared.public_claim(service_plan_id);
        if let Ok(permit) = Arc::clone(&claim).try_acquire_owned() {
            return Ok(permit);
        }

        tracing::debug!(
            transaction_id = self.id,
            service_plan_id,
            "Waiting for concurrent public visibility to settle"
        );
        claim
            .acquire_owned()
            .await
            .map_err(|e| StorageError::transaction_error(format!("Public claim closed: {e}")))
    }

    fn release_claim(&mut self, service_plan_id: &str) {
        self.claims.retain(|(plan, _)| plan != service_plan_id);
    }

    fn finish(&mut self, state: TransactionState) {
        self.claims.clear();
        self.staged_creates.clear();
        self.staged_deletes.clear();
        self.state = state;
        self.shared.record_outcome(state);
    }
}

#[async_trait]
impl VisibilityStore for InMemoryTransaction {
    async fn list_by_plan(&self, service_plan_id: &str) -> Result<Vec<Visibility>, StorageError> {
        self.shared.recorder.record(Operation::ListByPlan, |log| {
            log.lists.push(service_plan_id.to_string())
        })?;

        let state = self.shared.state.read().await;
        let visible = state
            .visibilities_for_plan(service_plan_id, &self.staged_deletes)
            .chain(
                self.staged_creates
                    .iter()
                    .filter(|v| v.service_plan_id == service_plan_id),
            )
            .cloned()
            .collect();
        Ok(visible)
    }

    async fn create(&mut self, visibility: &Visibility) -> Result<String, StorageError> {
        self.shared
            .recorder
            .record(Operation::Create, |log| log.creates.push(visibility.clone()))?;

        for staged in &self.staged_creates {
            if staged.id == visibility.id {
                return Err(StorageError::already_exists("visibility", &visibility.id));
            }
            if staged.service_plan_id == visibility.service_plan_id
                && staged.platform_id == visibility.platform_id
            {
                return Err(if visibility.is_public() {
                    StorageError::duplicate_visibility(&visibility.service_plan_id)
                } else {
                    StorageError::already_exists(
                        "visibility",
                        format!("{}/{}", visibility.service_plan_id, visibility.platform_id),
                    )
                });
            }
        }

        // Claim before reading committed data, so a holder that has just
        // committed is seen and one that rolled back is not.
        let claim = if visibility.is_public() && !self.holds_claim(&visibility.service_plan_id) {
            Some(self.acquire_claim(&visibility.service_plan_id).await?)
        } else {
            None
        };

        self.shared
            .state
            .read()
            .await
            .check_insert(visibility, &self.staged_deletes)?;

        if let Some(permit) = claim {
            self.claims
                .push((visibility.service_plan_id.clone(), permit));
        }
        self.staged_creates.push(visibility.clone());
        Ok(visibility.id.clone())
    }

    async fn delete(&mut self, id: &str) -> Result<(), StorageError> {
        self.shared
            .recorder
            .record(Operation::Delete, |log| log.deletes.push(id.to_string()))?;

        if let Some(position) = self.staged_creates.iter().position(|v| v.id == id) {
            let removed = self.staged_creates.remove(position);
            if removed.is_public() {
                self.release_claim(&removed.service_plan_id);
            }
            return Ok(());
        }

        let exists = {
            let state = self.shared.state.read().await;
            state.visibilities.contains_key(id)
        };
        if !exists || self.staged_deletes.contains(id) {
            return Err(StorageError::not_found("visibility", id));
        }

        self.staged_deletes.insert(id.to_string());
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for InMemoryTransaction {
    async fn get_broker(&self, broker_id: &str) -> Result<Option<Broker>, StorageError> {
        self.shared.recorder.record(Operation::GetBroker, |log| {
            log.broker_reads.push(broker_id.to_string())
        })?;

        let state = self.shared.state.read().await;
        Ok(state.brokers.get(broker_id).cloned())
    }

    async fn list_offerings_with_plans(
        &self,
        broker_id: &str,
    ) -> Result<Vec<ServiceOffering>, StorageError> {
        self.shared.recorder.record(Operation::ListCatalog, |log| {
            log.catalog_reads.push(broker_id.to_string())
        })?;

        let state = self.shared.state.read().await;
        Ok(state
            .offerings
            .iter()
            .filter(|offering| offering.broker_id == broker_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        if let Err(err) = self
            .shared
            .recorder
            .record(Operation::Commit, |log| log.commits += 1)
        {
            self.finish(TransactionState::Failed);
            return Err(err);
        }

        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.write().await;

        // Validate everything before touching committed data
        let conflict = self
            .staged_creates
            .iter()
            .find_map(|visibility| state.check_insert(visibility, &self.staged_deletes).err());
        if let Some(err) = conflict {
            drop(state);
            self.finish(TransactionState::Failed);
            return Err(StorageError::transaction_error(format!(
                "Failed to commit transaction: {err}"
            )));
        }

        for id in &self.staged_deletes {
            state.visibilities.remove(id);
        }
        for visibility in &self.staged_creates {
            state
                .visibilities
                .insert(visibility.id.clone(), visibility.clone());
        }

        tracing::debug!(
            transaction_id = self.id,
            created = self.staged_creates.len(),
            deleted = self.staged_deletes.len(),
            "Transaction committed successfully"
        );

        // Claims are released while the write lock is still held, so the
        // committed row is visible before the claim disappears.
        self.finish(TransactionState::Committed);
        drop(state);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        tracing::debug!(
            transaction_id = self.id,
            discarded = self.pending_writes(),
            "Transaction rolled back successfully"
        );
        self.finish(TransactionState::RolledBack);
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            tracing::warn!(
                transaction_id = self.id,
                discarded = self.pending_writes(),
                "InMemoryTransaction dropped without explicit commit/rollback - rolling back"
            );
            self.finish(TransactionState::RolledBack);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::InMemoryStorage;
    use crate::recorder::Operation;
    use planvis_core::{Broker, ServiceOffering, ServicePlan, Visibility};
    use planvis_storage::{CatalogStore, Transaction, TransactionalStorage, VisibilityStore};
    use time::OffsetDateTime;
    use time::macros::datetime;

    fn at() -> OffsetDateTime {
        datetime!(2024-05-01 8:00 UTC)
    }

    async fn seeded() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        storage.put_broker(Broker::new("broker-1", "sql")).await;
        storage
            .put_offering(
                ServiceOffering::new("so-1", "postgres", "broker-1")
                    .with_plan(ServicePlan::new("plan-1", "free"))
                    .with_plan(ServicePlan::new("plan-2", "paid")),
            )
            .await;
        storage
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let storage = seeded().await;
        let mut tx = storage.begin_transaction().await.unwrap();

        tx.create(&Visibility::public("v1", "plan-1", at()))
            .await
            .unwrap();
        assert_eq!(tx.list_by_plan("plan-1").await.unwrap().len(), 1);
        assert!(storage.visibilities_for_plan("plan-1").await.is_empty());

        tx.commit().await.unwrap();
        let committed = storage.visibilities_for_plan("plan-1").await;
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].id, "v1");
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let storage = seeded().await;
        storage
            .insert_visibility(Visibility::scoped("v0", "plan-2", "p1", at()))
            .await
            .unwrap();

        let mut tx = storage.begin_transaction().await.unwrap();
        tx.delete("v0").await.unwrap();
        tx.create(&Visibility::public("v1", "plan-1", at()))
            .await
            .unwrap();
        assert!(tx.list_by_plan("plan-2").await.unwrap().is_empty());
        tx.rollback().await.unwrap();

        let all = storage.all_visibilities().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "v0");
    }

    #[tokio::test]
    async fn test_drop_rolls_back_and_releases_claims() {
        let storage = seeded().await;
        {
            let mut tx = storage.begin_transaction().await.unwrap();
            tx.create(&Visibility::public("v1", "plan-1", at()))
                .await
                .unwrap();
        }

        assert!(storage.all_visibilities().await.is_empty());
        assert_eq!(storage.transaction_stats().rolled_back, 1);

        // The claim is gone, so another transaction may now create the grant
        let mut tx = storage.begin_transaction().await.unwrap();
        tx.create(&Visibility::public("v2", "plan-1", at()))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(storage.visibilities_for_plan("plan-1").await.len(), 1);
    }

    async fn wait_for_creates(storage: &InMemoryStorage, count: usize) {
        while storage.calls().creates.len() < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_public_create_waits_for_claim_holder_to_commit() {
        let storage = seeded().await;
        let mut first = storage.begin_transaction().await.unwrap();
        first
            .create(&Visibility::public("v1", "plan-1", at()))
            .await
            .unwrap();

        let mut second = storage.begin_transaction().await.unwrap();
        let pending = tokio::spawn(async move {
            let result = second
                .create(&Visibility::public("v2", "plan-1", at()))
                .await;
            (second, result)
        });
        wait_for_creates(&storage, 2).await;
        assert!(!pending.is_finished());

        first.commit().await.unwrap();
        let (second, result) = pending.await.unwrap();
        assert!(result.unwrap_err().is_duplicate_visibility());
        second.commit().await.unwrap();

        let rows = storage.visibilities_for_plan("plan-1").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "v1");
    }

    #[tokio::test]
    async fn test_public_create_proceeds_after_claim_holder_rolls_back() {
        let storage = seeded().await;
        let mut first = storage.begin_transaction().await.unwrap();
        first
            .create(&Visibility::public("v1", "plan-1", at()))
            .await
            .unwrap();

        let mut second = storage.begin_transaction().await.unwrap();
        let pending = tokio::spawn(async move {
            let result = second
                .create(&Visibility::public("v2", "plan-1", at()))
                .await;
            (second, result)
        });
        wait_for_creates(&storage, 2).await;

        first.rollback().await.unwrap();
        let (second, result) = pending.await.unwrap();
        assert_eq!(result.unwrap(), "v2");
        second.commit().await.unwrap();

        let rows = storage.visibilities_for_plan("plan-1").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "v2");
    }

    #[tokio::test]
    async fn test_direct_insert_rejected_while_public_claim_is_held() {
        let storage = seeded().await;
        let mut tx = storage.begin_transaction().await.unwrap();
        tx.create(&Visibility::public("v1", "plan-1", at()))
            .await
            .unwrap();

        let err = storage
            .insert_visibility(Visibility::public("v2", "plan-1", at()))
            .await
            .unwrap_err();
        assert!(err.is_duplicate_visibility());

        tx.rollback().await.unwrap();
        storage
            .insert_visibility(Visibility::public("v2", "plan-1", at()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_public_create_after_committed_row_is_rejected() {
        let storage = seeded().await;
        storage
            .insert_visibility(Visibility::public("v1", "plan-1", at()))
            .await
            .unwrap();

        let mut tx = storage.begin_transaction().await.unwrap();
        let err = tx
            .create(&Visibility::public("v2", "plan-1", at()))
            .await
            .unwrap_err();
        assert!(err.is_duplicate_visibility());

        // Replacing the public row within one transaction is allowed
        tx.delete("v1").await.unwrap();
        tx.create(&Visibility::public("v2", "plan-1", at()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let rows = storage.visibilities_for_plan("plan-1").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "v2");
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let storage = seeded().await;
        storage
            .insert_visibility(Visibility::scoped("v0", "plan-1", "p1", at()))
            .await
            .unwrap();

        let mut tx = storage.begin_transaction().await.unwrap();
        assert!(tx.delete("nope").await.unwrap_err().is_not_found());
        tx.delete("v0").await.unwrap();
        assert!(tx.delete("v0").await.unwrap_err().is_not_found());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_of_staged_create_unstages_it() {
        let storage = seeded().await;
        let mut tx = storage.begin_transaction().await.unwrap();
        tx.create(&Visibility::public("v1", "plan-1", at()))
            .await
            .unwrap();
        tx.delete("v1").await.unwrap();
        tx.commit().await.unwrap();

        assert!(storage.all_visibilities().await.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_reads() {
        let storage = seeded().await;
        let tx = storage.begin_transaction().await.unwrap();

        let broker = tx.get_broker("broker-1").await.unwrap().unwrap();
        assert_eq!(broker.name, "sql");
        assert!(tx.get_broker("broker-2").await.unwrap().is_none());

        let catalog = tx.list_offerings_with_plans("broker-1").await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].plans.len(), 2);
        assert!(tx.list_offerings_with_plans("broker-2").await.unwrap().is_empty());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failures_and_call_log() {
        let storage = seeded().await;
        storage.fail_nth(Operation::ListByPlan, 2);

        let tx = storage.begin_transaction().await.unwrap();
        assert!(tx.list_by_plan("plan-1").await.is_ok());
        let err = tx.list_by_plan("plan-2").await.unwrap_err();
        assert!(err.is_unavailable());
        tx.rollback().await.unwrap();

        let calls = storage.calls();
        assert_eq!(calls.lists, vec!["plan-1".to_string(), "plan-2".to_string()]);
        assert_eq!(calls.write_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_discards_writes() {
        let storage = seeded().await;
        storage.fail_nth(Operation::Commit, 1);

        let mut tx = storage.begin_transaction().await.unwrap();
        tx.create(&Visibility::public("v1", "plan-1", at()))
            .await
            .unwrap();
        assert!(tx.commit().await.unwrap_err().is_unavailable());

        assert!(storage.all_visibilities().await.is_empty());
        let stats = storage.transaction_stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.open(), 0);
    }
}
