//! End-to-end reconciliation scenarios against the in-memory backend.
//!
//! Covers:
//! - the catalog-to-visibility mapping for public and non-public plans
//! - idempotence of repeated runs
//! - all-or-nothing behavior when a run fails part way
//! - convergence of concurrent runs on the same broker

use std::sync::Arc;

use planvis_core::{
    Broker, CoreError, IdGenerator, PlanMetadata, SequenceIdGenerator, ServiceOffering,
    ServicePlan, Visibility,
};
use planvis_db_memory::{InMemoryStorage, Operation};
use planvis_reconcile::{
    AbsentFlag, MetadataFlagPolicy, PolicyError, ReconcileError, ReconcileReport, Reconciler,
    reconcile_broker,
};
use planvis_storage::TransactionalStorage;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::macros::datetime;

// =============================================================================
// Test Infrastructure
// =============================================================================

const BROKER: &str = "broker-1";

fn at() -> OffsetDateTime {
    datetime!(2024-01-01 0:00 UTC)
}

fn plan(id: &str, metadata: Value) -> ServicePlan {
    ServicePlan::new(id, format!("{id}-name")).with_metadata(PlanMetadata::new(metadata))
}

fn public_plan(id: &str) -> ServicePlan {
    plan(id, json!({ "complementary": true }))
}

fn private_plan(id: &str) -> ServicePlan {
    plan(id, json!({ "complementary": false }))
}

async fn storage_with(plans: Vec<ServicePlan>) -> InMemoryStorage {
    let storage = InMemoryStorage::new();
    storage.put_broker(Broker::new(BROKER, "sql-broker")).await;
    let offering = plans
        .into_iter()
        .fold(ServiceOffering::new("offering-1", "sql", BROKER), |o, p| {
            o.with_plan(p)
        });
    storage.put_offering(offering).await;
    storage
}

fn reconciler() -> Reconciler {
    Reconciler::new(Arc::new(MetadataFlagPolicy::default()))
        .with_id_generator(Arc::new(SequenceIdGenerator::new("vis")))
}

async fn public_count(storage: &InMemoryStorage, plan_id: &str) -> usize {
    storage
        .visibilities_for_plan(plan_id)
        .await
        .iter()
        .filter(|v| v.is_public())
        .count()
}

struct FailingIds;

impl IdGenerator for FailingIds {
    fn generate(&self) -> planvis_core::Result<String> {
        Err(CoreError::id_generation("entropy source exhausted"))
    }
}

// =============================================================================
// Catalog to visibility mapping
// =============================================================================

#[tokio::test]
async fn new_public_plan_gets_one_public_visibility() {
    let storage = storage_with(vec![public_plan("plan-1")]).await;

    let report = reconcile_broker(&storage, &reconciler(), BROKER)
        .await
        .expect("reconcile");

    assert_eq!(report.created, vec!["vis-1".to_string()]);
    assert!(report.deleted.is_empty());
    let rows = storage.visibilities_for_plan("plan-1").await;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_public());
    assert_eq!(rows[0].created_at, rows[0].updated_at);
}

#[tokio::test]
async fn public_plan_replaces_scoped_visibilities() {
    let storage = storage_with(vec![public_plan("plan-1")]).await;
    storage
        .insert_visibility(Visibility::scoped("old-p1", "plan-1", "p1", at()))
        .await
        .expect("seed");

    let report = reconcile_broker(&storage, &reconciler(), BROKER)
        .await
        .expect("reconcile");

    assert_eq!(report.deleted, vec!["old-p1".to_string()]);
    let rows = storage.visibilities_for_plan("plan-1").await;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_public());
}

#[tokio::test]
async fn plan_no_longer_public_loses_public_visibility() {
    let storage = storage_with(vec![private_plan("plan-1")]).await;
    storage
        .insert_visibility(Visibility::public("pub", "plan-1", at()))
        .await
        .expect("seed");

    let report = reconcile_broker(&storage, &reconciler(), BROKER)
        .await
        .expect("reconcile");

    assert_eq!(report.deleted, vec!["pub".to_string()]);
    assert!(report.created.is_empty());
    assert!(storage.visibilities_for_plan("plan-1").await.is_empty());
}

#[tokio::test]
async fn non_public_plan_keeps_scoped_visibilities() {
    let storage = storage_with(vec![plan("plan-1", json!({}))]).await;
    storage
        .insert_visibility(Visibility::scoped("p1", "plan-1", "p1", at()))
        .await
        .expect("seed");
    storage
        .insert_visibility(Visibility::scoped("p2", "plan-1", "p2", at()))
        .await
        .expect("seed");

    let report = reconcile_broker(&storage, &reconciler(), BROKER)
        .await
        .expect("reconcile");

    assert!(report.is_noop());
    assert_eq!(report.plans_processed, 1);
    assert_eq!(storage.calls().write_count(), 0);
    assert_eq!(storage.visibilities_for_plan("plan-1").await.len(), 2);
}

#[tokio::test]
async fn string_flags_are_accepted() {
    let storage = storage_with(vec![
        plan("plan-1", json!({ "complementary": "TRUE" })),
        plan("plan-2", json!({ "complementary": "false" })),
    ])
    .await;

    reconcile_broker(&storage, &reconciler(), BROKER)
        .await
        .expect("reconcile");

    assert_eq!(public_count(&storage, "plan-1").await, 1);
    assert_eq!(public_count(&storage, "plan-2").await, 0);
}

#[tokio::test]
async fn unknown_broker_is_a_noop() {
    let storage = storage_with(vec![public_plan("plan-1")]).await;

    let report = reconcile_broker(&storage, &reconciler(), "missing-broker")
        .await
        .expect("reconcile");

    assert!(report.is_noop());
    assert_eq!(report.plans_processed, 0);
    assert!(storage.all_visibilities().await.is_empty());
    assert_eq!(storage.transaction_stats().committed, 1);
}

#[tokio::test]
async fn broker_without_plans_is_a_noop() {
    let storage = InMemoryStorage::new();
    storage.put_broker(Broker::new(BROKER, "empty")).await;

    let report = reconcile_broker(&storage, &reconciler(), BROKER)
        .await
        .expect("reconcile");

    assert!(report.is_noop());
    assert_eq!(storage.calls().count(Operation::ListByPlan), 0);
}

#[tokio::test]
async fn other_brokers_are_untouched() {
    let storage = storage_with(vec![public_plan("plan-1")]).await;
    storage.put_broker(Broker::new("broker-2", "other")).await;
    storage
        .put_offering(ServiceOffering::new("offering-2", "other", "broker-2").with_plan(public_plan("plan-9")))
        .await;

    reconcile_broker(&storage, &reconciler(), BROKER)
        .await
        .expect("reconcile");

    assert_eq!(public_count(&storage, "plan-1").await, 1);
    assert!(storage.visibilities_for_plan("plan-9").await.is_empty());
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn second_run_issues_no_writes() {
    let storage = storage_with(vec![
        public_plan("plan-1"),
        private_plan("plan-2"),
        public_plan("plan-3"),
    ])
    .await;
    storage
        .insert_visibility(Visibility::scoped("s1", "plan-1", "p1", at()))
        .await
        .expect("seed");
    storage
        .insert_visibility(Visibility::scoped("s2", "plan-2", "p1", at()))
        .await
        .expect("seed");
    let reconciler = reconciler();

    let first = reconcile_broker(&storage, &reconciler, BROKER)
        .await
        .expect("first run");
    assert!(!first.is_noop());
    let after_first = storage.all_visibilities().await;

    storage.reset_calls();
    let second = reconcile_broker(&storage, &reconciler, BROKER)
        .await
        .expect("second run");

    assert!(second.is_noop());
    assert_eq!(second.races_absorbed, 0);
    assert_eq!(storage.calls().write_count(), 0);
    assert_eq!(storage.all_visibilities().await, after_first);
}

// =============================================================================
// Atomicity
// =============================================================================

#[tokio::test]
async fn storage_failure_mid_run_persists_nothing() {
    let storage = storage_with((1..=5).map(|i| public_plan(&format!("plan-{i}"))).collect()).await;
    storage
        .insert_visibility(Visibility::scoped("s1", "plan-1", "p1", at()))
        .await
        .expect("seed");
    let before = storage.all_visibilities().await;
    storage.fail_nth(Operation::ListByPlan, 3);

    let err = reconcile_broker(&storage, &reconciler(), BROKER)
        .await
        .expect_err("third plan listing fails");

    match &err {
        ReconcileError::Storage { broker_id, plan_id, source } => {
            assert_eq!(broker_id, BROKER);
            assert_eq!(plan_id.as_deref(), Some("plan-3"));
            assert!(source.is_unavailable());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_transient());
    assert_eq!(storage.all_visibilities().await, before);
    // Plans 1 and 2 were written inside the aborted transaction
    assert!(storage.calls().write_count() > 0);

    let stats = storage.transaction_stats();
    assert_eq!(stats.committed, 0);
    assert_eq!(stats.rolled_back, 1);
    assert_eq!(stats.open(), 0);
}

#[tokio::test]
async fn policy_failure_mid_run_persists_nothing() {
    let storage = storage_with(vec![
        public_plan("plan-1"),
        public_plan("plan-2"),
        plan("plan-3", json!({ "complementary": "sometimes" })),
        public_plan("plan-4"),
        public_plan("plan-5"),
    ])
    .await;

    let err = reconcile_broker(&storage, &reconciler(), BROKER)
        .await
        .expect_err("malformed flag");

    match &err {
        ReconcileError::Policy { plan_id, source, .. } => {
            assert_eq!(plan_id, "plan-3");
            assert!(matches!(source, PolicyError::Metadata(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.plan_id(), Some("plan-3"));
    assert!(storage.all_visibilities().await.is_empty());
}

#[tokio::test]
async fn rejecting_policy_fails_on_missing_flag() {
    let storage = storage_with(vec![public_plan("plan-1"), plan("plan-2", json!(null))]).await;
    let reconciler = Reconciler::new(Arc::new(
        MetadataFlagPolicy::default().with_absent(AbsentFlag::Reject),
    ));

    let err = reconcile_broker(&storage, &reconciler, BROKER)
        .await
        .expect_err("missing flag");

    assert!(matches!(
        err,
        ReconcileError::Policy {
            source: PolicyError::MissingFlag { .. },
            ..
        }
    ));
    assert!(storage.all_visibilities().await.is_empty());
}

#[tokio::test]
async fn id_generation_failure_persists_nothing() {
    let storage = storage_with(vec![private_plan("plan-0"), public_plan("plan-1")]).await;
    storage
        .insert_visibility(Visibility::public("pub-0", "plan-0", at()))
        .await
        .expect("seed");
    let reconciler =
        Reconciler::new(Arc::new(MetadataFlagPolicy::default())).with_id_generator(Arc::new(FailingIds));

    let err = reconcile_broker(&storage, &reconciler, BROKER)
        .await
        .expect_err("no ids");

    assert!(matches!(err, ReconcileError::IdentityGeneration { ref plan_id, .. } if plan_id == "plan-1"));
    assert_eq!(public_count(&storage, "plan-0").await, 1);
    assert!(storage.visibilities_for_plan("plan-1").await.is_empty());
}

#[tokio::test]
async fn commit_failure_persists_nothing() {
    let storage = storage_with(vec![public_plan("plan-1")]).await;
    storage.fail_nth(Operation::Commit, 1);

    let err = reconcile_broker(&storage, &reconciler(), BROKER)
        .await
        .expect_err("commit fails");

    assert!(matches!(err, ReconcileError::Storage { plan_id: None, .. }));
    assert!(storage.all_visibilities().await.is_empty());
    assert_eq!(storage.transaction_stats().failed, 1);
}

// =============================================================================
// Concurrency
// =============================================================================

/// Starts a second run on its own transaction and returns once it is blocked
/// creating the public visibility that `first` already staged.
async fn start_competing_run(
    storage: &InMemoryStorage,
    reconciler: &Arc<Reconciler>,
) -> tokio::task::JoinHandle<ReconcileReport> {
    let creates_before = storage.calls().creates.len();
    let handle = tokio::spawn({
        let storage = storage.clone();
        let reconciler = Arc::clone(reconciler);
        async move {
            let mut second = storage.begin_transaction().await.expect("begin second");
            let report = reconciler
                .reconcile(second.as_mut(), BROKER)
                .await
                .expect("second run");
            second.commit().await.expect("commit second");
            report
        }
    });
    while storage.calls().creates.len() == creates_before {
        tokio::task::yield_now().await;
    }
    assert!(!handle.is_finished());
    handle
}

#[tokio::test]
async fn interleaved_runs_converge_on_one_public_visibility() {
    let storage = storage_with(vec![public_plan("plan-1")]).await;
    let reconciler = Arc::new(reconciler());

    let mut first = storage.begin_transaction().await.expect("begin first");
    let first_report = reconciler
        .reconcile(first.as_mut(), BROKER)
        .await
        .expect("first run");
    assert_eq!(first_report.created.len(), 1);

    let second_run = start_competing_run(&storage, &reconciler).await;
    first.commit().await.expect("commit first");

    let second_report = second_run.await.expect("join");
    assert!(second_report.created.is_empty());
    assert_eq!(second_report.races_absorbed, 1);
    assert_eq!(public_count(&storage, "plan-1").await, 1);
}

#[tokio::test]
async fn competing_run_creates_grant_when_first_rolls_back() {
    let storage = storage_with(vec![public_plan("plan-1")]).await;
    let reconciler = Arc::new(reconciler());

    let mut first = storage.begin_transaction().await.expect("begin first");
    reconciler
        .reconcile(first.as_mut(), BROKER)
        .await
        .expect("first run");

    let second_run = start_competing_run(&storage, &reconciler).await;
    first.rollback().await.expect("rollback first");

    let second_report = second_run.await.expect("join");
    assert_eq!(second_report.created.len(), 1);
    assert_eq!(second_report.races_absorbed, 0);

    let rows = storage.visibilities_for_plan("plan-1").await;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_public());
    assert_eq!(rows[0].id, second_report.created[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_keep_at_most_one_public_visibility() {
    let plans: Vec<_> = (1..=10)
        .map(|i| {
            if i % 3 == 0 {
                private_plan(&format!("plan-{i}"))
            } else {
                public_plan(&format!("plan-{i}"))
            }
        })
        .collect();
    let storage = storage_with(plans).await;
    for i in 1..=10 {
        storage
            .insert_visibility(Visibility::scoped(format!("s{i}"), format!("plan-{i}"), "p1", at()))
            .await
            .expect("seed");
    }
    let reconciler = Arc::new(Reconciler::new(Arc::new(MetadataFlagPolicy::default())));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let storage = storage.clone();
            let reconciler = Arc::clone(&reconciler);
            tokio::spawn(async move { reconcile_broker(&storage, &reconciler, BROKER).await })
        })
        .collect();
    for handle in handles {
        handle.await.expect("join").expect("reconcile");
    }

    for i in 1..=10 {
        let plan_id = format!("plan-{i}");
        let rows = storage.visibilities_for_plan(&plan_id).await;
        if i % 3 == 0 {
            assert_eq!(rows.len(), 1, "{plan_id} keeps its scoped grant");
            assert!(!rows[0].is_public());
        } else {
            assert_eq!(rows.len(), 1, "{plan_id} has exactly one grant");
            assert!(rows[0].is_public());
        }
    }
    assert_eq!(storage.transaction_stats().open(), 0);
}
