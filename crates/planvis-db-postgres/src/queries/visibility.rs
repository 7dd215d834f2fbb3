//! Visibility queries.

use chrono::{DateTime, Utc};
use planvis_core::Visibility;
use planvis_storage::StorageError;
use sqlx_core::error::Error as SqlxError;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgTransaction;
use tracing::debug;

use super::{chrono_to_time, time_to_chrono};
use crate::error::{
    PG_FOREIGN_KEY_VIOLATION, PG_UNIQUE_VIOLATION, PUBLIC_VISIBILITY_INDEX,
    VISIBILITY_PRIMARY_KEY, has_pg_error_code, query_error, violated_constraint,
};

type VisibilityRow = (String, String, String, DateTime<Utc>, DateTime<Utc>);

fn from_row(row: VisibilityRow) -> Result<Visibility, StorageError> {
    let (id, service_plan_id, platform_id, created_at, updated_at) = row;
    Ok(Visibility {
        id,
        service_plan_id,
        platform_id,
        created_at: chrono_to_time(created_at)?,
        updated_at: chrono_to_time(updated_at)?,
    })
}

/// Lists the visibilities of one plan, oldest first.
pub async fn list_by_plan(
    tx: &mut PgTransaction<'_>,
    service_plan_id: &str,
) -> Result<Vec<Visibility>, StorageError> {
    let rows: Vec<VisibilityRow> = query_as(
        r#"SELECT id, service_plan_id, platform_id, created_at, updated_at
           FROM visibilities
           WHERE service_plan_id = $1
           ORDER BY created_at, id"#,
    )
    .bind(service_plan_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| query_error("list visibilities", e))?;

    rows.into_iter().map(from_row).collect()
}

/// Inserts a visibility.
///
/// The insert runs inside a savepoint: a constraint violation would
/// otherwise abort the whole enclosing transaction, and the caller may
/// want to carry on after a lost race.
pub async fn insert(
    tx: &mut PgTransaction<'_>,
    visibility: &Visibility,
) -> Result<String, StorageError> {
    query("SAVEPOINT visibility_insert")
        .execute(&mut **tx)
        .await
        .map_err(|e| query_error("open savepoint", e))?;

    let inserted = query(
        r#"INSERT INTO visibilities (id, service_plan_id, platform_id, created_at, updated_at)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(&visibility.id)
    .bind(&visibility.service_plan_id)
    .bind(&visibility.platform_id)
    .bind(time_to_chrono(visibility.created_at)?)
    .bind(time_to_chrono(visibility.updated_at)?)
    .execute(&mut **tx)
    .await;

    match inserted {
        Ok(_) => {
            query("RELEASE SAVEPOINT visibility_insert")
                .execute(&mut **tx)
                .await
                .map_err(|e| query_error("release savepoint", e))?;
            Ok(visibility.id.clone())
        }
        Err(err) => {
            query("ROLLBACK TO SAVEPOINT visibility_insert")
                .execute(&mut **tx)
                .await
                .map_err(|e| query_error("roll back to savepoint", e))?;
            debug!(
                visibility_id = %visibility.id,
                plan_id = %visibility.service_plan_id,
                error = %err,
                "Visibility insert rejected"
            );
            Err(insert_error(err, visibility))
        }
    }
}

/// Deletes a visibility by id.
pub async fn delete(tx: &mut PgTransaction<'_>, id: &str) -> Result<(), StorageError> {
    let result = query("DELETE FROM visibilities WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|e| query_error("delete visibility", e))?;

    if result.rows_affected() == 0 {
        return Err(StorageError::not_found("visibility", id));
    }
    Ok(())
}

/// Maps a failed insert to the storage error contract.
pub(crate) fn insert_error(err: SqlxError, visibility: &Visibility) -> StorageError {
    if has_pg_error_code(&err, PG_UNIQUE_VIOLATION) {
        return match violated_constraint(&err) {
            Some(VISIBILITY_PRIMARY_KEY) => {
                StorageError::already_exists("visibility", &visibility.id)
            }
            Some(PUBLIC_VISIBILITY_INDEX) => {
                StorageError::duplicate_visibility(&visibility.service_plan_id)
            }
            // (plan, platform) key; for a public row it is the same conflict
            _ if visibility.is_public() => {
                StorageError::duplicate_visibility(&visibility.service_plan_id)
            }
            _ => StorageError::already_exists(
                "visibility",
                format!("{}/{}", visibility.service_plan_id, visibility.platform_id),
            ),
        };
    }

    if has_pg_error_code(&err, PG_FOREIGN_KEY_VIOLATION) {
        return StorageError::not_found("service_plan", &visibility.service_plan_id);
    }

    query_error("create visibility", err)
}
