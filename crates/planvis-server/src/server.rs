use std::net::SocketAddr;

use axum::{Router, middleware, routing::get, routing::post};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::state::AppState;
use crate::{handlers, middleware as app_middleware};

/// Wraps a host router so broker creates and updates reconcile visibilities.
pub fn with_visibility_reconciliation<S>(router: Router<S>, state: AppState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(
        state,
        app_middleware::reconcile_visibilities,
    ))
}

pub fn build_app(state: AppState) -> Router {
    let router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/v1/reconcile/{broker_id}", post(handlers::reconcile))
        .with_state(state.clone());

    with_visibility_reconciliation(router, state).layer(TraceLayer::new_for_http())
}

pub struct PlanvisServer {
    addr: SocketAddr,
    app: Router,
}

impl PlanvisServer {
    /// Builds the server from configuration, initializing the storage backend.
    ///
    /// # Errors
    ///
    /// Fails when the storage backend cannot be initialized.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let state = AppState::from_config(cfg).await?;
        tracing::info!(
            backend = state.storage.backend_name(),
            policy = state.reconciler.policy().name(),
            brokers_path = %state.brokers_path,
            "Reconciliation state initialized"
        );
        Ok(Self {
            addr: cfg.addr(),
            app: build_app(state),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
