//! Error types for the PostgreSQL storage backend.

use planvis_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for unique violation (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL error code for foreign key violation (23503).
pub const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// Partial unique index allowing one public visibility per plan.
pub const PUBLIC_VISIBILITY_INDEX: &str = "visibilities_public_plan_idx";

/// Primary key constraint of the visibilities table.
pub const VISIBILITY_PRIMARY_KEY: &str = "visibilities_pkey";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Name of the constraint a database error was raised by, if any.
pub fn violated_constraint(err: &SqlxError) -> Option<&str> {
    match err {
        SqlxError::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

/// Whether the error means the database could not be reached or the
/// connection broke mid-statement.
pub fn is_connection_failure(err: &SqlxError) -> bool {
    matches!(
        err,
        SqlxError::Io(_)
            | SqlxError::Tls(_)
            | SqlxError::Protocol(_)
            | SqlxError::PoolTimedOut
            | SqlxError::PoolClosed
            | SqlxError::WorkerCrashed
    )
}

/// Maps a failed query to a storage error.
pub fn query_error(action: &str, err: SqlxError) -> StorageError {
    if is_connection_failure(&err) {
        StorageError::unavailable(format!("Failed to {action}: {err}"))
    } else {
        StorageError::internal(format!("Failed to {action}: {err}"))
    }
}

/// Errors specific to the PostgreSQL storage backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx_core::error::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Connection(e) => query_error("connect to PostgreSQL", e),
            PostgresError::Migration(e) => StorageError::internal(format!("Migration error: {e}")),
            PostgresError::Config { message } => {
                StorageError::internal(format!("Configuration error: {message}"))
            }
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
