//! Channel provisioning handlers
//!
//! Issue, revoke and liveness-check endpoints used by the management side.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::error::ApiError;
use crate::controller::{ChannelController, IssuanceError, IssuanceRequest};
use crate::routing::{Forwarder, RouteCache};

/// Application state shared across handlers
pub struct AppState {
    /// Channel controller
    pub controller: ChannelController,

    /// Channel to tunnel port lookups for the proxy
    pub routes: Arc<RouteCache>,

    /// Upstream HTTP forwarder
    pub forwarder: Forwarder,
}

/// Response carrying an issued certificate
#[derive(Debug, Serialize)]
pub struct SignatureResponse {
    /// PEM-encoded channel certificate
    pub cert: String,
}

/// Issue a channel certificate
///
/// POST /nps/signature
pub async fn issue_channel(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IssuanceRequest>, JsonRejection>,
) -> Result<Json<SignatureResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        warn!(error = %e, "Unreadable issuance request");
        ApiError::from(IssuanceError::Param)
    })?;

    let issued = state.controller.handle_issuance(request).await?;

    info!(
        channel_id = issued.record.channel_id,
        machine_id = %issued.record.machine_id,
        "Certificate issued"
    );

    Ok(Json(SignatureResponse {
        cert: issued.certificate,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeQuery {
    #[serde(default)]
    pub machine_id: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub msg: String,
    pub revoked: Vec<i64>,
    pub failed: Vec<i64>,
}

/// Revoke every active channel of a machine
///
/// DELETE /nps/delete?machineId=
pub async fn revoke_machine(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RevokeQuery>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let machine_id = query.machine_id.trim();
    if machine_id.is_empty() {
        return Err(IssuanceError::Param.into());
    }

    let report = state.controller.handle_revocation(machine_id).await?;

    let msg = if report.failed.is_empty() {
        "success".to_string()
    } else {
        format!("{} channel(s) could not be revoked", report.failed.len())
    };

    Ok(Json(RevokeResponse {
        msg,
        revoked: report.revoked,
        failed: report.failed,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckQuery {
    #[serde(default)]
    pub channel_id: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub able: bool,
}

/// Report whether a channel is usable
///
/// GET /nps/check?channelId=
///
/// An id that does not parse names no channel and is reported unusable.
pub async fn check_channel(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, ApiError> {
    let raw = query.channel_id.trim();
    if raw.is_empty() {
        return Err(IssuanceError::Param.into());
    }

    let able = match raw.parse::<i64>() {
        Ok(channel_id) => state.controller.check_channel(channel_id).await,
        Err(_) => false,
    };

    Ok(Json(CheckResponse { able }))
}
