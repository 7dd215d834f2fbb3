//! In-memory visibility storage backend for planvis.
//!
//! This crate provides an in-memory implementation of the
//! `TransactionalStorage` trait from `planvis-storage`. Writes are buffered
//! per transaction and applied atomically on commit. The "one public
//! visibility per plan" constraint is enforced at this layer, across
//! concurrent transactions: a competing public insert waits for the
//! transaction holding the plan's claim, the same way a unique index would.
//!
//! Every store call is recorded, and individual calls can be made to fail,
//! which makes the backend usable as a test double.
//!
//! # Example
//!
//! ```ignore
//! use planvis_db_memory::InMemoryStorage;
//! use planvis_storage::TransactionalStorage;
//!
//! let storage = InMemoryStorage::new();
//! storage.put_broker(Broker::new("broker-1", "postgres-broker")).await;
//!
//! let tx = storage.begin_transaction().await?;
//! let catalog = tx.list_offerings_with_plans("broker-1").await?;
//! tx.rollback().await?;
//! ```

pub mod recorder;
pub mod storage;
pub mod transaction;

// Re-export the storage traits for convenience
pub use planvis_storage::{StorageError, Transaction, TransactionalStorage};

pub use recorder::{CallLog, Operation};
pub use storage::InMemoryStorage;
pub use transaction::{InMemoryTransaction, TransactionState, TransactionStats};

/// Creates a new in-memory storage instance behind the shared storage alias.
pub fn create_storage() -> planvis_storage::DynStorage {
    std::sync::Arc::new(InMemoryStorage::new())
}
