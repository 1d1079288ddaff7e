use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "threshold": state.config.assistant.threshold,
        "chatbot_configured": state.config.chatbot.is_some(),
        "escalation_configured": state.config.escalation.chat_address.is_some(),
    }))
}
