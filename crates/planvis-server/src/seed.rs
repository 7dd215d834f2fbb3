//! Catalog seeding at startup.
//!
//! The server does not own the broker registry, so a catalog snapshot can be
//! loaded from a JSON file named by `storage.seed_path`:
//!
//! ```json
//! {
//!   "brokers": [{ "id": "broker-1", "name": "sql" }],
//!   "offerings": [{
//!     "id": "so-1", "name": "postgres", "broker_id": "broker-1",
//!     "plans": [{ "id": "plan-1", "name": "free", "metadata": { "complementary": true } }]
//!   }]
//! }
//! ```

use std::path::Path;

use anyhow::Context;
use planvis_core::{Broker, ServiceOffering};
use planvis_db_memory::InMemoryStorage;
use planvis_db_postgres::PostgresStorage;
use planvis_storage::StorageError;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogSeed {
    #[serde(default)]
    pub brokers: Vec<Broker>,
    #[serde(default)]
    pub offerings: Vec<ServiceOffering>,
}

impl CatalogSeed {
    /// Reads and checks a seed file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or when an offering
    /// names a broker the file does not declare.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog seed {}", path.display()))?;
        let mut seed: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing catalog seed {}", path.display()))?;
        seed.check()?;
        seed.reparent_plans();
        Ok(seed)
    }

    fn check(&self) -> anyhow::Result<()> {
        for offering in &self.offerings {
            if !self.brokers.iter().any(|b| b.id == offering.broker_id) {
                anyhow::bail!(
                    "offering {} references unknown broker {}",
                    offering.id,
                    offering.broker_id
                );
            }
        }
        Ok(())
    }

    fn reparent_plans(&mut self) {
        for offering in &mut self.offerings {
            for plan in &mut offering.plans {
                plan.service_offering_id.clone_from(&offering.id);
            }
        }
    }

    pub async fn apply_memory(&self, storage: &InMemoryStorage) {
        for broker in &self.brokers {
            storage.put_broker(broker.clone()).await;
        }
        for offering in &self.offerings {
            storage.put_offering(offering.clone()).await;
        }
    }

    /// # Errors
    ///
    /// Returns the first failed upsert.
    pub async fn apply_postgres(&self, storage: &PostgresStorage) -> Result<(), StorageError> {
        for broker in &self.brokers {
            storage.put_broker(broker).await?;
        }
        for offering in &self.offerings {
            storage.put_offering(offering).await?;
        }
        Ok(())
    }
}
