//! SQL query implementations for the PostgreSQL storage backend.
//!
//! Every function runs on a caller-owned transaction, so reads observe the
//! transaction's own uncommitted writes.

pub mod catalog;
pub mod visibility;

use chrono::{DateTime, Utc};
use planvis_storage::StorageError;
use time::OffsetDateTime;

/// Converts chrono DateTime to time OffsetDateTime.
pub(crate) fn chrono_to_time(dt: DateTime<Utc>) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .and_then(|t| t.replace_nanosecond(dt.timestamp_subsec_nanos()))
        .map_err(|e| StorageError::internal(format!("Invalid timestamp from database: {e}")))
}

/// Converts time OffsetDateTime to chrono DateTime.
pub(crate) fn time_to_chrono(t: OffsetDateTime) -> Result<DateTime<Utc>, StorageError> {
    DateTime::<Utc>::from_timestamp(t.unix_timestamp(), t.nanosecond())
        .ok_or_else(|| StorageError::internal(format!("Timestamp out of range: {t}")))
}
