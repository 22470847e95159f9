//! Administrative API.
//!
//! Grants and resets are the only operations that surface errors to their
//! caller: invalid parameters are a 400, store failures a 503. The
//! request path never sees either.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::QuotagateError;
use crate::limiter::MultiTierGate;
use crate::policy::Operation;

#[derive(Clone)]
struct AdminState {
    gate: Arc<MultiTierGate>,
}

/// Router exposing the administrative operations.
pub fn admin_router(gate: Arc<MultiTierGate>) -> Router {
    Router::new()
        .route("/admin/grants", post(create_grant))
        .route("/admin/grants/:identity/:operation", delete(revoke_grant))
        .route("/admin/reset", post(reset_limits))
        .with_state(AdminState { gate })
}

#[derive(Debug, Deserialize)]
struct GrantRequest {
    identity: String,
    operation: Operation,
    multiplier: f64,
    duration_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct ResetRequest {
    identity: String,
    #[serde(default)]
    operation: Option<Operation>,
}

async fn create_grant(
    State(state): State<AdminState>,
    Json(req): Json<GrantRequest>,
) -> Response {
    let result = state
        .gate
        .grant_temporary_increase(
            &req.identity,
            req.operation,
            req.multiplier,
            Duration::from_secs(req.duration_seconds),
        )
        .await;

    match result {
        Ok(()) => {
            info!(
                identity = %req.identity,
                operation = %req.operation,
                multiplier = req.multiplier,
                duration_seconds = req.duration_seconds,
                "Temporary grant created"
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn revoke_grant(
    State(state): State<AdminState>,
    Path((identity, operation)): Path<(String, String)>,
) -> Response {
    let Some(operation) = Operation::parse(&operation) else {
        return error_response(QuotagateError::InvalidGrant(format!(
            "unknown operation '{}'",
            operation
        )));
    };

    match state.gate.revoke_grant(&identity, operation).await {
        Ok(()) => {
            info!(identity = %identity, operation = %operation, "Grant revoked");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn reset_limits(
    State(state): State<AdminState>,
    Json(req): Json<ResetRequest>,
) -> Response {
    match state.gate.reset_limits(&req.identity, req.operation).await {
        Ok(()) => {
            info!(identity = %req.identity, operation = ?req.operation, "Limits reset");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

fn error_response(error: QuotagateError) -> Response {
    let status = match &error {
        QuotagateError::InvalidGrant(_) => StatusCode::BAD_REQUEST,
        QuotagateError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(status = %status, error = %error, "Administrative request failed");
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}
