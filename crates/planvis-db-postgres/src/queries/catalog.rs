//! Broker catalog queries.

use planvis_core::{Broker, PlanMetadata, ServiceOffering, ServicePlan};
use planvis_storage::StorageError;
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgTransaction;

use crate::error::query_error;

/// Reads a broker by id.
pub async fn get_broker(
    tx: &mut PgTransaction<'_>,
    broker_id: &str,
) -> Result<Option<Broker>, StorageError> {
    let row: Option<(String, String)> = query_as("SELECT id, name FROM brokers WHERE id = $1")
        .bind(broker_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| query_error("read broker", e))?;

    Ok(row.map(|(id, name)| Broker { id, name }))
}

type CatalogRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<Value>,
);

/// Lists the broker's offerings in registration order, each with its plans
/// in catalog order.
pub async fn list_offerings_with_plans(
    tx: &mut PgTransaction<'_>,
    broker_id: &str,
) -> Result<Vec<ServiceOffering>, StorageError> {
    let rows: Vec<CatalogRow> = query_as(
        r#"SELECT o.id, o.name, p.id, p.name, p.metadata
           FROM service_offerings o
           LEFT JOIN service_plans p ON p.service_offering_id = o.id
           WHERE o.broker_id = $1
           ORDER BY o.seq, o.id, p.position, p.id"#,
    )
    .bind(broker_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| query_error("list broker catalog", e))?;

    let mut offerings: Vec<ServiceOffering> = Vec::new();
    for (offering_id, offering_name, plan_id, plan_name, metadata) in rows {
        if offerings.last().is_none_or(|o| o.id != offering_id) {
            offerings.push(ServiceOffering::new(offering_id, offering_name, broker_id));
        }
        let (Some(plan_id), Some(offering)) = (plan_id, offerings.last_mut()) else {
            continue;
        };
        let mut plan = ServicePlan::new(plan_id, plan_name.unwrap_or_default())
            .with_metadata(PlanMetadata::new(metadata.unwrap_or(Value::Null)));
        plan.service_offering_id.clone_from(&offering.id);
        offering.plans.push(plan);
    }

    Ok(offerings)
}

/// Inserts or renames a broker.
pub async fn upsert_broker(tx: &mut PgTransaction<'_>, broker: &Broker) -> Result<(), StorageError> {
    query(
        r#"INSERT INTO brokers (id, name) VALUES ($1, $2)
           ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, updated_at = NOW()"#,
    )
    .bind(&broker.id)
    .bind(&broker.name)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_error("store broker", e))?;
    Ok(())
}

/// Inserts or replaces an offering and its plans.
///
/// Plans missing from `offering.plans` are removed, together with their
/// visibilities.
pub async fn upsert_offering(
    tx: &mut PgTransaction<'_>,
    offering: &ServiceOffering,
) -> Result<(), StorageError> {
    query(
        r#"INSERT INTO service_offerings (id, name, broker_id) VALUES ($1, $2, $3)
           ON CONFLICT (id) DO UPDATE
           SET name = EXCLUDED.name, broker_id = EXCLUDED.broker_id, updated_at = NOW()"#,
    )
    .bind(&offering.id)
    .bind(&offering.name)
    .bind(&offering.broker_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_error("store service offering", e))?;

    let plan_ids: Vec<String> = offering.plans.iter().map(|p| p.id.clone()).collect();
    query("DELETE FROM service_plans WHERE service_offering_id = $1 AND NOT (id = ANY($2))")
        .bind(&offering.id)
        .bind(&plan_ids)
        .execute(&mut **tx)
        .await
        .map_err(|e| query_error("prune service plans", e))?;

    for (position, plan) in offering.plans.iter().enumerate() {
        let position = i32::try_from(position)
            .map_err(|_| StorageError::internal("too many plans in one offering"))?;
        query(
            r#"INSERT INTO service_plans (id, name, service_offering_id, position, metadata)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (id) DO UPDATE
               SET name = EXCLUDED.name,
                   service_offering_id = EXCLUDED.service_offering_id,
                   position = EXCLUDED.position,
                   metadata = EXCLUDED.metadata,
                   updated_at = NOW()"#,
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(&offering.id)
        .bind(position)
        .bind(plan.metadata.as_value())
        .execute(&mut **tx)
        .await
        .map_err(|e| query_error("store service plan", e))?;
    }

    Ok(())
}
