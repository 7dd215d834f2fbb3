//! Reconciliation trigger for the broker API.

use axum::{
    Json,
    body::{Body, to_bytes},
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use planvis_reconcile::{ReconcileError, reconcile_broker};
use serde_json::{Value, json};

use crate::state::AppState;

/// Largest broker response body the trigger buffers to read the broker id.
const MAX_BROKER_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

// =============================================================================
// Visibility Reconciliation Middleware
// =============================================================================

/// Reconciles plan visibilities after a successful broker create or update.
///
/// Runs the inner handler first. When the request was a `POST` or `PATCH` on
/// the brokers collection (or anything below it) and the handler answered
/// with a 2xx status, the broker id is read from the response body and the
/// broker's visibilities are reconciled in one transaction. Any other
/// request or response passes through untouched.
///
/// A failed reconciliation replaces the handler's response with a JSON
/// error. The broker change itself stays in place; repeating the request
/// reruns the reconciliation.
pub async fn reconcile_visibilities(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let triggers = is_broker_mutation(req.method(), req.uri().path(), &state.brokers_path);
    let response = next.run(req).await;

    if !triggers || !response.status().is_success() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BROKER_RESPONSE_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer broker response");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "broker response could not be read",
            );
        }
    };

    let Some(broker_id) = broker_id_from_response(&bytes) else {
        tracing::warn!("Broker response carries no id, skipping visibility reconciliation");
        return Response::from_parts(parts, Body::from(bytes));
    };

    tracing::debug!(broker_id = %broker_id, "Reconciling visibilities after broker change");
    match reconcile_broker(state.storage.as_ref(), &state.reconciler, &broker_id).await {
        Ok(report) => {
            tracing::debug!(
                broker_id = %broker_id,
                created = report.created.len(),
                deleted = report.deleted.len(),
                "Finished reconciling visibilities"
            );
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(err) => reconcile_error_response(&err),
    }
}

/// Whether a request creates or updates a broker.
pub fn is_broker_mutation(method: &Method, path: &str, brokers_path: &str) -> bool {
    if method != Method::POST && method != Method::PATCH {
        return false;
    }
    let base = brokers_path.trim_end_matches('/');
    match path.strip_prefix(base) {
        Some("") | Some("/") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Reads the broker id from a broker create/update response body.
pub fn broker_id_from_response(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        _ => None,
    }
}

/// Maps a reconciliation failure to an HTTP response.
pub fn reconcile_error_response(err: &ReconcileError) -> Response {
    let (status, code) = match err {
        ReconcileError::Policy { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "policy_error"),
        ReconcileError::Storage { .. } if err.is_transient() => {
            (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
        }
        ReconcileError::Storage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        ReconcileError::IdentityGeneration { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "identity_generation_error")
        }
    };
    tracing::error!(
        broker_id = %err.broker_id(),
        plan_id = ?err.plan_id(),
        status = status.as_u16(),
        category = ?err.storage_category(),
        error = %err,
        "Visibility reconciliation failed"
    );
    error_response(status, code, &err.to_string())
}

pub(crate) fn error_response(status: StatusCode, code: &str, description: &str) -> Response {
    (
        status,
        Json(json!({ "error": code, "description": description })),
    )
        .into_response()
}
