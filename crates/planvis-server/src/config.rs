use std::net::SocketAddr;
use std::path::PathBuf;

use planvis_db_postgres::PostgresConfig;
use planvis_reconcile::{AbsentFlag, DEFAULT_METADATA_KEY, MetadataFlagPolicy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn addr(&self) -> SocketAddr {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.server.port)))
    }

    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        let path = &self.server.brokers_path;
        if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) {
            return Err("server.brokers_path must start with '/' and not end with '/'".into());
        }
        // Storage validations
        if self.storage.backend == StorageBackend::Postgres {
            let url = self.storage.postgres.as_ref().map(|p| p.url.as_str());
            if url.unwrap_or("").is_empty() {
                return Err("storage.backend=postgres requires storage.postgres.url".into());
            }
        }
        // Policy validations
        if self.policy.metadata_key.trim().is_empty() {
            return Err("policy.metadata_key must not be empty".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Collection path of the broker API; POST/PATCH on it or below it
    /// trigger reconciliation.
    #[serde(default = "default_brokers_path")]
    pub brokers_path: String,
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_brokers_path() -> String {
    "/v1/service_brokers".into()
}
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            brokers_path: default_brokers_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    /// JSON catalog snapshot loaded into the store at startup.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_metadata_key")]
    pub metadata_key: String,
    /// Decision for plans whose metadata does not carry the key.
    #[serde(default)]
    pub absent: AbsentFlag,
}
fn default_metadata_key() -> String {
    DEFAULT_METADATA_KEY.into()
}
impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            metadata_key: default_metadata_key(),
            absent: AbsentFlag::default(),
        }
    }
}
impl PolicyConfig {
    pub fn build(&self) -> MetadataFlagPolicy {
        MetadataFlagPolicy::new(&self.metadata_key).with_absent(self.absent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, looked up in the working directory.
    pub const DEFAULT_CONFIG_PATH: &str = "planvis.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., PLANVIS__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("PLANVIS")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
