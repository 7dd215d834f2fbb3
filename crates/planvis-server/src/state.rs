use std::sync::Arc;

use planvis_db_memory::InMemoryStorage;
use planvis_db_postgres::PostgresStorage;
use planvis_reconcile::Reconciler;
use planvis_storage::DynStorage;

use crate::config::{AppConfig, StorageBackend, StorageConfig};
use crate::seed::CatalogSeed;

/// Shared state of the reconciliation endpoints and trigger.
#[derive(Clone)]
pub struct AppState {
    pub storage: DynStorage,
    pub reconciler: Arc<Reconciler>,
    pub brokers_path: Arc<str>,
}

impl AppState {
    pub fn new(storage: DynStorage, reconciler: Reconciler, brokers_path: impl Into<Arc<str>>) -> Self {
        Self {
            storage,
            reconciler: Arc::new(reconciler),
            brokers_path: brokers_path.into(),
        }
    }

    /// Builds the storage backend and metadata-flag reconciler described by `cfg`.
    ///
    /// # Errors
    ///
    /// Fails when the configured storage backend cannot be initialized.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let storage = storage_from_config(&cfg.storage).await?;
        let reconciler = Reconciler::new(Arc::new(cfg.policy.build()));
        Ok(Self::new(storage, reconciler, cfg.server.brokers_path.as_str()))
    }
}

/// Opens the configured backend and loads `storage.seed_path` into it.
///
/// # Errors
///
/// Fails when the backend cannot be opened or the seed cannot be loaded.
pub async fn storage_from_config(cfg: &StorageConfig) -> anyhow::Result<DynStorage> {
    let seed = cfg.seed_path.as_deref().map(CatalogSeed::load).transpose()?;

    match cfg.backend {
        StorageBackend::Memory => {
            let storage = InMemoryStorage::new();
            match &seed {
                Some(seed) => {
                    seed.apply_memory(&storage).await;
                    tracing::info!(
                        brokers = seed.brokers.len(),
                        offerings = seed.offerings.len(),
                        "Seeded in-memory catalog"
                    );
                }
                None => tracing::warn!(
                    "In-memory storage has no storage.seed_path; every broker is unknown and reconciliation is a no-op"
                ),
            }
            tracing::warn!("Using in-memory storage; visibilities are lost on restart");
            Ok(Arc::new(storage))
        }
        StorageBackend::Postgres => {
            let pg = cfg
                .postgres
                .clone()
                .ok_or_else(|| anyhow::anyhow!("storage.postgres is not configured"))?;
            let storage = PostgresStorage::new(pg).await?;
            if let Some(seed) = &seed {
                seed.apply_postgres(&storage).await?;
                tracing::info!(
                    brokers = seed.brokers.len(),
                    offerings = seed.offerings.len(),
                    "Seeded PostgreSQL catalog"
                );
            }
            Ok(Arc::new(storage))
        }
    }
}
