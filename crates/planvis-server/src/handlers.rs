use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use planvis_reconcile::reconcile_broker;
use serde::Serialize;

use crate::middleware::reconcile_error_response;
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: &'static str,
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            backend: state.storage.backend_name(),
        }),
    )
}

/// Reconciles one broker on demand and returns the report.
pub async fn reconcile(State(state): State<AppState>, Path(broker_id): Path<String>) -> Response {
    match reconcile_broker(state.storage.as_ref(), &state.reconciler, &broker_id).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => reconcile_error_response(&err),
    }
}
