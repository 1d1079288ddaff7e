//! Assistant webhook endpoint, POST /webhook.
//!
//! The assistant platform calls this twice per exchange: once with the user
//! input, once with its candidate output. The handler authenticates the call,
//! routes the turn against the caller's session and echoes the envelope back,
//! with `output.generic` replaced when the knowledge base answered.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use kbridge_core::BridgeError;
use kbridge_protocol::WebhookEnvelope;
use kbridge_sessions::{SessionError, SessionState};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::app::AppState;
use crate::auth::verify_jwt;

const INCORRECT_SECRET: &str = "Incorrect Secret.";
const INVALID_REQUEST: &str = "Invalid request!";

type ErrorResponse = (StatusCode, Json<Value>);

/// POST /webhook
///
/// Returns the (possibly rewritten) envelope on success, 401 on auth
/// failure and `{error}` with a status per error kind otherwise. Session
/// state is written back only when the turn was routed successfully.
#[instrument(skip_all, fields(request_id = %uuid::Uuid::now_v7()))]
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookEnvelope>, ErrorResponse> {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    verify_jwt(
        authorization,
        state.config.auth.jwt_secret.as_deref(),
        chrono::Utc::now().timestamp(),
    )
    .map_err(error_response)?;

    let mut envelope: WebhookEnvelope = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "invalid JSON in webhook body");
        error_body(StatusCode::BAD_REQUEST, INVALID_REQUEST)
    })?;

    let identity = envelope.payload.external_id().ok_or_else(|| {
        warn!("webhook without a user id");
        error_body(StatusCode::BAD_REQUEST, INVALID_REQUEST)
    })?;

    let session = SessionState::load(state.sessions.as_ref(), &identity)
        .map_err(|e| error_response(session_error(e)))?;

    let turn = std::mem::take(&mut envelope.payload);
    let routed = state
        .router
        .route(turn, session)
        .await
        .map_err(|e| error_response(e.into()))?;

    routed
        .state
        .save(state.sessions.as_ref(), &identity)
        .map_err(|e| error_response(session_error(e)))?;

    info!(identity = %identity, outcome = ?routed.outcome, "turn handled");
    envelope.payload = routed.turn;
    Ok(Json(envelope))
}

fn session_error(e: SessionError) -> BridgeError {
    BridgeError::Session(e.to_string())
}

/// Map a bridge error to its HTTP status and `{error}` body.
fn error_response(e: BridgeError) -> ErrorResponse {
    warn!(code = e.code(), error = %e, "webhook failed");
    let status = match &e {
        // The reason stays in the log; callers get the fixed payload.
        BridgeError::AuthFailed(_) => return error_body(StatusCode::UNAUTHORIZED, INCORRECT_SECRET),
        BridgeError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        BridgeError::UnrecognizedResponse(_) | BridgeError::KnowledgeBase(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, &e.to_string())
}

fn error_body(status: StatusCode, message: &str) -> ErrorResponse {
    (status, Json(json!({ "error": message })))
}
