//! Storage traits for the visibility storage abstraction layer.
//!
//! This module defines the core traits that all storage backends must implement.

use async_trait::async_trait;
use planvis_core::{Broker, ServiceOffering, Visibility};

use crate::error::StorageError;

/// Read/write access to persisted visibility records.
///
/// Implementations must enforce "at most one public visibility per plan" at
/// the storage layer, so that two writers racing on the same plan cannot both
/// succeed.
#[async_trait]
pub trait VisibilityStore: Send + Sync {
    /// Lists every visibility that references `service_plan_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` on transport or driver failure.
    async fn list_by_plan(&self, service_plan_id: &str) -> Result<Vec<Visibility>, StorageError>;

    /// Inserts a visibility and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::DuplicateVisibility` if the visibility is public
    /// and the plan already has a public visibility.
    /// Returns `StorageError::AlreadyExists` on an id or `(plan, platform)` collision.
    /// Returns `StorageError::Unavailable` on transport or driver failure.
    async fn create(&mut self, visibility: &Visibility) -> Result<String, StorageError>;

    /// Deletes a visibility by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no visibility has this id.
    /// Returns `StorageError::Unavailable` on transport or driver failure.
    async fn delete(&mut self, id: &str) -> Result<(), StorageError>;
}

/// Read access to broker catalogs.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Reads a broker by id.
    ///
    /// Returns `None` if the broker does not exist.
    async fn get_broker(&self, broker_id: &str) -> Result<Option<Broker>, StorageError>;

    /// Lists the broker's offerings with their plans nested, in catalog order.
    ///
    /// An unknown broker has an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` on transport or driver failure.
    async fn list_offerings_with_plans(
        &self,
        broker_id: &str,
    ) -> Result<Vec<ServiceOffering>, StorageError>;
}

/// A transaction scope exposing the store contracts.
///
/// Operations within a transaction are isolated from other operations until
/// the transaction is committed. If an error occurs or `rollback` is called,
/// all operations are undone. Dropping a transaction without committing it
/// rolls it back.
///
/// # Example
///
/// ```ignore
/// use planvis_storage::TransactionalStorage;
///
/// async fn revoke(storage: &dyn TransactionalStorage, id: &str) -> Result<(), StorageError> {
///     let mut tx = storage.begin_transaction().await?;
///     tx.delete(id).await?;
///     tx.commit().await
/// }
/// ```
#[async_trait]
pub trait Transaction: VisibilityStore + CatalogStore {
    /// Commits all operations in this transaction.
    ///
    /// After commit, the transaction is consumed and cannot be used again.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if the commit fails.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Rolls back all operations in this transaction.
    ///
    /// After rollback, the transaction is consumed and cannot be used again.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if the rollback fails.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// A storage backend able to open transactions.
#[async_trait]
pub trait TransactionalStorage: Send + Sync {
    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the backend cannot be reached,
    /// or `StorageError::TransactionError` if a transaction cannot be started.
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError>;

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}
