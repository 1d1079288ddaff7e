use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use kbridge_connector::TurnRouter;
use kbridge_core::{config::MAX_BODY_BYTES, BridgeConfig};
use kbridge_sessions::SessionStore;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: BridgeConfig,
    pub sessions: Arc<dyn SessionStore>,
    pub router: TurnRouter,
}

impl AppState {
    pub fn new(config: BridgeConfig, sessions: Arc<dyn SessionStore>, router: TurnRouter) -> Self {
        Self {
            config,
            sessions,
            router,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/webhook", post(crate::http::webhook::webhook_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
