//! API module for the tunnelgate server

pub mod error;
pub mod handlers;

use axum::{
    routing::{any, delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Proxied frontends are loaded cross-origin by the management UI.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // Channel endpoints
        .route("/nps/signature", post(handlers::issue_channel))
        .route("/nps/delete", delete(handlers::revoke_machine))
        .route("/nps/check", get(handlers::check_channel))
        // Proxy ingress
        .route("/proxy/{*path}", any(handlers::proxy))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
