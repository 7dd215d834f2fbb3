//! Per-plan convergence of visibilities towards the policy decision.

use std::sync::Arc;

use planvis_core::{
    Broker, Clock, IdGenerator, ServiceOffering, ServicePlan, SystemClock, UuidGenerator,
    Visibility,
};
use planvis_storage::Transaction;
use tracing::{debug, info, instrument};

use crate::error::ReconcileError;
use crate::policy::VisibilityPolicy;
use crate::report::ReconcileReport;

/// Converges the visibilities of one broker's plans to what a policy dictates.
///
/// The reconciler holds no state between runs. All reads and writes go
/// through the transaction handed to [`Reconciler::reconcile`].
#[derive(Clone)]
pub struct Reconciler {
    policy: Arc<dyn VisibilityPolicy>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    /// Creates a reconciler minting UUIDv4 ids and wall-clock timestamps.
    pub fn new(policy: Arc<dyn VisibilityPolicy>) -> Self {
        Self {
            policy,
            ids: Arc::new(UuidGenerator),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &dyn VisibilityPolicy {
        self.policy.as_ref()
    }

    /// Reconciles every plan of the broker's catalog inside `tx`.
    ///
    /// Does not commit or roll back; on error the caller must roll `tx` back.
    ///
    /// # Errors
    ///
    /// Storage failures, policy failures and id generation failures abort
    /// the run. A delete that finds nothing and a public create that loses a
    /// race are treated as already satisfied.
    #[instrument(skip(self, tx), fields(policy = self.policy.name()))]
    pub async fn reconcile(
        &self,
        tx: &mut dyn Transaction,
        broker_id: &str,
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::new(broker_id);

        let Some(broker) = tx
            .get_broker(broker_id)
            .await
            .map_err(|e| ReconcileError::storage(broker_id, None, e))?
        else {
            debug!(broker_id, "Broker not found, nothing to reconcile");
            return Ok(report);
        };

        let catalog = tx
            .list_offerings_with_plans(broker_id)
            .await
            .map_err(|e| ReconcileError::storage(broker_id, None, e))?;

        for offering in &catalog {
            for plan in &offering.plans {
                self.reconcile_plan(tx, &broker, offering, plan, &mut report)
                    .await?;
            }
        }

        info!(
            broker_id,
            plans = report.plans_processed,
            created = report.created.len(),
            deleted = report.deleted.len(),
            races_absorbed = report.races_absorbed,
            "Visibilities reconciled"
        );

        Ok(report)
    }

    async fn reconcile_plan(
        &self,
        tx: &mut dyn Transaction,
        broker: &Broker,
        offering: &ServiceOffering,
        plan: &ServicePlan,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let desired_public = self
            .policy
            .is_public(broker, offering, plan)
            .map_err(|e| ReconcileError::policy(&broker.id, &plan.id, e))?;

        let existing = tx
            .list_by_plan(&plan.id)
            .await
            .map_err(|e| ReconcileError::storage(&broker.id, Some(&plan.id), e))?;

        let mut has_public = false;
        for visibility in &existing {
            let keep = match (desired_public, visibility.is_public()) {
                // Only the first public grant survives
                (true, true) => !std::mem::replace(&mut has_public, true),
                (false, false) => true,
                // Scoped grants go once the plan is public, public ones once it is not
                _ => false,
            };
            if !keep {
                self.delete(tx, broker, plan, visibility, report).await?;
            }
        }

        if desired_public && !has_public {
            self.create_public(tx, broker, plan, report).await?;
        }

        report.plans_processed += 1;
        Ok(())
    }

    async fn delete(
        &self,
        tx: &mut dyn Transaction,
        broker: &Broker,
        plan: &ServicePlan,
        visibility: &Visibility,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        match tx.delete(&visibility.id).await {
            Ok(()) => {
                debug!(
                    broker_id = %broker.id,
                    plan_id = %plan.id,
                    visibility_id = %visibility.id,
                    platform_id = %visibility.platform_id,
                    "Deleted visibility"
                );
                report.deleted.push(visibility.id.clone());
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(
                    plan_id = %plan.id,
                    visibility_id = %visibility.id,
                    "Visibility already deleted"
                );
                report.races_absorbed += 1;
                Ok(())
            }
            Err(e) => Err(ReconcileError::storage(&broker.id, Some(&plan.id), e)),
        }
    }

    async fn create_public(
        &self,
        tx: &mut dyn Transaction,
        broker: &Broker,
        plan: &ServicePlan,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let id = self
            .ids
            .generate()
            .map_err(|e| ReconcileError::identity_generation(&broker.id, &plan.id, e))?;
        let visibility = Visibility::public(id, &plan.id, self.clock.now());

        match tx.create(&visibility).await {
            Ok(created_id) => {
                debug!(
                    broker_id = %broker.id,
                    plan_id = %plan.id,
                    visibility_id = %created_id,
                    "Created public visibility"
                );
                report.created.push(created_id);
                Ok(())
            }
            Err(e) if e.is_duplicate_visibility() => {
                debug!(plan_id = %plan.id, "Public visibility already created concurrently");
                report.races_absorbed += 1;
                Ok(())
            }
            Err(e) => Err(ReconcileError::storage(&broker.id, Some(&plan.id), e)),
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("policy", &self.policy.name())
            .finish_non_exhaustive()
    }
}
