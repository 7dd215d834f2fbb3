//! PostgreSQL transaction implementation.
//!
//! Wraps an sqlx transaction and exposes the visibility and catalog stores
//! on it. Uniqueness of public visibilities is enforced by the database
//! through a partial unique index, so concurrent transactions racing on the
//! same plan serialize on that index.

use async_trait::async_trait;
use planvis_core::{Broker, ServiceOffering, Visibility};
use planvis_storage::{CatalogStore, StorageError, Transaction, VisibilityStore};
use sqlx_postgres::PgTransaction;
use tokio::sync::Mutex;

use crate::queries;

/// PostgreSQL transaction wrapper.
///
/// sqlx requires mutable access to the transaction for every statement,
/// reads included, hence the mutex. The `Option` is emptied on commit or
/// rollback. Dropping an unfinished transaction rolls it back.
pub struct PostgresTransaction {
    tx: Mutex<Option<Box<PgTransaction<'static>>>>,
}

fn completed() -> StorageError {
    StorageError::transaction_error("Transaction already completed (committed or rolled back)")
}

impl PostgresTransaction {
    pub fn new(tx: PgTransaction<'static>) -> Self {
        Self {
            tx: Mutex::new(Some(Box::new(tx))),
        }
    }
}

#[async_trait]
impl VisibilityStore for PostgresTransaction {
    async fn list_by_plan(&self, service_plan_id: &str) -> Result<Vec<Visibility>, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_deref_mut().ok_or_else(completed)?;
        queries::visibility::list_by_plan(tx, service_plan_id).await
    }

    async fn create(&mut self, visibility: &Visibility) -> Result<String, StorageError> {
        let tx = self.tx.get_mut().as_deref_mut().ok_or_else(completed)?;
        queries::visibility::insert(tx, visibility).await
    }

    async fn delete(&mut self, id: &str) -> Result<(), StorageError> {
        let tx = self.tx.get_mut().as_deref_mut().ok_or_else(completed)?;
        queries::visibility::delete(tx, id).await
    }
}

#[async_trait]
impl CatalogStore for PostgresTransaction {
    async fn get_broker(&self, broker_id: &str) -> Result<Option<Broker>, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_deref_mut().ok_or_else(completed)?;
        queries::catalog::get_broker(tx, broker_id).await
    }

    async fn list_offerings_with_plans(
        &self,
        broker_id: &str,
    ) -> Result<Vec<ServiceOffering>, StorageError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_deref_mut().ok_or_else(completed)?;
        queries::catalog::list_offerings_with_plans(tx, broker_id).await
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.get_mut().take() {
            tx.commit().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to commit transaction: {e}"))
            })?;
            tracing::debug!("Transaction committed successfully");
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.get_mut().take() {
            tx.rollback().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to rollback transaction: {e}"))
            })?;
            tracing::debug!("Transaction rolled back successfully");
        }
        Ok(())
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        // sqlx issues the ROLLBACK when the inner transaction is dropped
        if self.tx.get_mut().is_some() {
            tracing::warn!(
                "PostgresTransaction dropped without explicit commit/rollback - will auto-rollback"
            );
        }
    }
}
