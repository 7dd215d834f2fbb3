//! HTTP trigger surface for planvis.
//!
//! The [`middleware::reconcile_visibilities`] layer reconciles a broker's
//! plan visibilities after every successful broker create or update passing
//! through the router it wraps. The standalone server also exposes an
//! on-demand reconciliation endpoint.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod seed;
pub mod server;
pub mod state;

pub use config::AppConfig;
pub use seed::CatalogSeed;
pub use server::{PlanvisServer, build_app, with_visibility_reconciliation};
pub use state::{AppState, storage_from_config};
