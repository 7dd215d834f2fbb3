//! PostgreSQL storage implementation.

use async_trait::async_trait;
use planvis_core::{Broker, ServiceOffering};
use planvis_storage::{StorageError, Transaction, TransactionalStorage};
use sqlx_postgres::PgPool;
use tracing::instrument;

use crate::config::PostgresConfig;
use crate::error::query_error;
use crate::transaction::PostgresTransaction;
use crate::{migrations, pool, queries};

/// PostgreSQL-backed visibility storage.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a new `PostgresStorage` with the given configuration.
    ///
    /// Runs the embedded migrations when `config.run_migrations` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection pool cannot be created
    /// or if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::create_pool(&config).await?;

        if config.run_migrations {
            migrations::run(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Creates a new `PostgresStorage` from an existing connection pool.
    ///
    /// Migrations are not run automatically when using this constructor.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Registers or renames a broker.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    #[instrument(skip(self, broker), fields(broker_id = %broker.id))]
    pub async fn put_broker(&self, broker: &Broker) -> Result<(), StorageError> {
        let mut tx = self.begin().await?;
        queries::catalog::upsert_broker(&mut tx, broker).await?;
        tx.commit()
            .await
            .map_err(|e| query_error("commit broker", e))
    }

    /// Registers an offering with its plans, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the broker does not exist or the write fails.
    #[instrument(skip(self, offering), fields(offering_id = %offering.id))]
    pub async fn put_offering(&self, offering: &ServiceOffering) -> Result<(), StorageError> {
        let mut tx = self.begin().await?;
        queries::catalog::upsert_offering(&mut tx, offering).await?;
        tx.commit()
            .await
            .map_err(|e| query_error("commit service offering", e))
    }

    async fn begin(&self) -> Result<sqlx_postgres::PgTransaction<'static>, StorageError> {
        self.pool
            .begin()
            .await
            .map_err(|e| query_error("begin transaction", e))
    }
}

#[async_trait]
impl TransactionalStorage for PostgresStorage {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        let tx = self.begin().await?;
        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
