//! Connection pool for the visibility store.
//!
//! Reconciliation transactions are short and run one per broker mutation,
//! so the pool is sized for bursts of small transactions rather than long
//! reads.

use std::str::FromStr;
use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgConnectOptions, PgPool, Postgres};
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

/// Type alias for PostgreSQL pool options.
pub type PgPoolOptions = PoolOptions<Postgres>;

/// Name reported in `pg_stat_activity` for planvis connections.
pub const APPLICATION_NAME: &str = "planvis";

const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Builds pool options from the configuration without connecting.
///
/// # Errors
///
/// Returns [`PostgresError::Config`] for a zero pool size.
pub fn pool_options(config: &PostgresConfig) -> Result<PgPoolOptions> {
    if config.pool_size == 0 {
        return Err(PostgresError::config("pool_size must be greater than 0"));
    }

    let min_connections = config
        .min_connections
        .unwrap_or(config.pool_size / 4)
        .clamp(1, config.pool_size);

    let options = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .max_lifetime(
            config
                .max_lifetime_secs
                .map_or(DEFAULT_MAX_LIFETIME, Duration::from_secs),
        )
        .idle_timeout(config.idle_timeout_ms.map(Duration::from_millis))
        .test_before_acquire(false);

    Ok(options)
}

/// Parses the database URL and tags connections with [`APPLICATION_NAME`].
///
/// # Errors
///
/// Returns [`PostgresError::Connection`] if the URL cannot be parsed.
pub fn connect_options(config: &PostgresConfig) -> Result<PgConnectOptions> {
    Ok(PgConnectOptions::from_str(&config.url)?.application_name(APPLICATION_NAME))
}

/// Opens the visibility store's connection pool.
///
/// # Errors
///
/// Returns [`PostgresError::Config`] for an invalid configuration and
/// [`PostgresError::Connection`] if the initial connections cannot be opened.
#[instrument(skip(config), fields(url = %redact_url(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    let options = pool_options(config)?;
    let connect = connect_options(config)?;

    info!(
        max_connections = options.get_max_connections(),
        min_connections = options.get_min_connections(),
        acquire_timeout_ms = config.connect_timeout_ms,
        "Opening visibility store pool"
    );

    let pool = options.connect_with(connect).await?;

    debug!(size = pool.size(), "Visibility store pool ready");

    Ok(pool)
}

/// Replaces the password of a database URL with `****` for logging.
pub(crate) fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _password)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}
