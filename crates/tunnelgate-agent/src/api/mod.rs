//! Loopback API for the tunnelgate agent

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use handlers::AgentState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Create the local API router
pub fn create_router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/npc/check", get(handlers::check))
        .route("/npc/csr", get(handlers::csr))
        .route("/npc/auth", post(handlers::auth))
        .route("/npc/start", post(handlers::start))
        .route("/npc/stop", post(handlers::stop))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
