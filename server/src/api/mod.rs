//! Operator-facing HTTP and WebSocket surface

mod handlers;
mod ws;

use crate::hub::Hub;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use handlers::ApiError;
pub use ws::OperatorRequest;

/// Shared state accessible from axum handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
}

/// Build the router with all operator routes
pub fn router(hub: Arc<Hub>) -> Router {
    let state = AppState { hub };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/devices", get(handlers::list_devices))
        .route("/api/devices/status", get(handlers::device_status))
        .route("/api/devices/{id}/history", get(handlers::device_history))
        .route("/api/command", post(handlers::send_command))
        .route("/api/ussd/start", post(handlers::start_ussd))
        .route("/api/ussd/respond", post(handlers::respond_ussd))
        .route("/api/ussd/end", post(handlers::end_ussd))
        .route("/api/ussd/sessions", get(handlers::list_sessions))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
