//! # planvis-storage
//!
//! Storage abstraction layer for planvis.
//!
//! This crate defines the traits that all storage backends must implement.
//! It does not contain any implementations - those are provided by separate crates.
//!
//! ## Overview
//!
//! - [`VisibilityStore`]: list/create/delete visibility records
//! - [`CatalogStore`]: read a broker's offerings and plans
//! - [`Transaction`]: a scope exposing both stores, committed or rolled back as a unit
//! - [`TransactionalStorage`]: opens transactions
//!
//! ## Example
//!
//! ```ignore
//! use planvis_storage::{StorageError, TransactionalStorage};
//!
//! async fn public_grants(
//!     storage: &dyn TransactionalStorage,
//!     plan_id: &str,
//! ) -> Result<usize, StorageError> {
//!     let tx = storage.begin_transaction().await?;
//!     let count = tx
//!         .list_by_plan(plan_id)
//!         .await?
//!         .iter()
//!         .filter(|v| v.is_public())
//!         .count();
//!     tx.rollback().await?;
//!     Ok(count)
//! }
//! ```

mod error;
mod traits;

pub use error::{ErrorCategory, StorageError};
pub use traits::{CatalogStore, Transaction, TransactionalStorage, VisibilityStore};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shareable storage trait object.
pub type DynStorage = std::sync::Arc<dyn TransactionalStorage>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use planvis_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::traits::{CatalogStore, Transaction, TransactionalStorage, VisibilityStore};
    pub use crate::{DynStorage, StorageResult};
}
