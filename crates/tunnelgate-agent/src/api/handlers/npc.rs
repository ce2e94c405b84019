//! Tunnel-client control handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::api::error::AgentError;
use crate::controller::{AgentController, CredentialSnapshot};

/// Application state shared across handlers
pub struct AgentState {
    pub controller: AgentController,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub msg: String,
}

impl MessageResponse {
    fn new(msg: &str) -> Json<Self> {
        Json(Self { msg: msg.to_string() })
    }
}

/// Current credential and tunnel-client status
///
/// GET /npc/check
pub async fn check(State(state): State<Arc<AgentState>>) -> Json<CredentialSnapshot> {
    Json(state.controller.snapshot())
}

#[derive(Debug, Serialize)]
pub struct CsrResponse {
    pub csr: String,
}

/// Mint a certificate request for this machine
///
/// GET /npc/csr
pub async fn csr(State(state): State<Arc<AgentState>>) -> Result<Json<CsrResponse>, AgentError> {
    let csr = state.controller.new_request().map_err(|e| {
        error!(error = %e, "Failed to build certificate request");
        AgentError::Internal(e.to_string())
    })?;
    Ok(Json(CsrResponse { csr }))
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub cert: String,
}

/// Accept a signed channel certificate
///
/// POST /npc/auth
pub async fn auth(
    State(state): State<Arc<AgentState>>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AgentError> {
    let Json(request) = payload.map_err(|_| AgentError::BadRequest("param error".into()))?;
    if request.cert.trim().is_empty() {
        return Err(AgentError::BadRequest("param error".into()));
    }

    let grant = state.controller.load_certificate(&request.cert).await?;
    info!(channel_id = grant.channel_id, "Channel certificate accepted");
    Ok(MessageResponse::new("success"))
}

/// Restart the tunnel client with a fresh restart budget
///
/// POST /npc/start
pub async fn start(State(state): State<Arc<AgentState>>) -> Result<Json<MessageResponse>, AgentError> {
    state.controller.start().await?;
    Ok(MessageResponse::new("start success"))
}

/// Stop the tunnel client
///
/// POST /npc/stop
pub async fn stop(State(state): State<Arc<AgentState>>) -> Json<MessageResponse> {
    state.controller.stop().await;
    MessageResponse::new("stop success")
}
