//! Transactional scope around one reconciliation run.

use planvis_storage::TransactionalStorage;
use tracing::{instrument, warn};

use crate::error::ReconcileError;
use crate::reconciler::Reconciler;
use crate::report::ReconcileReport;

/// Reconciles one broker atomically.
///
/// Opens a transaction, runs the reconciler in it, and commits only if every
/// plan converged. Any failure rolls the whole run back. Dropping the
/// returned future before it completes drops the transaction, which rolls
/// it back as well.
///
/// # Errors
///
/// Returns the run's [`ReconcileError`], or a storage error if the
/// transaction cannot be opened or committed.
#[instrument(skip(storage, reconciler), fields(backend = storage.backend_name()))]
pub async fn reconcile_broker(
    storage: &dyn TransactionalStorage,
    reconciler: &Reconciler,
    broker_id: &str,
) -> Result<ReconcileReport, ReconcileError> {
    let mut tx = storage
        .begin_transaction()
        .await
        .map_err(|e| ReconcileError::storage(broker_id, None, e))?;

    match reconciler.reconcile(tx.as_mut(), broker_id).await {
        Ok(report) => {
            tx.commit()
                .await
                .map_err(|e| ReconcileError::storage(broker_id, None, e))?;
            Ok(report)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    broker_id,
                    error = %rollback_err,
                    "Failed to roll back visibility reconciliation"
                );
            }
            warn!(
                broker_id,
                category = ?err.storage_category(),
                error = %err,
                "Visibility reconciliation aborted"
            );
            Err(err)
        }
    }
}
