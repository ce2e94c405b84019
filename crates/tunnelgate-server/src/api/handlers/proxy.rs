//! Reverse proxy ingress
//!
//! `/proxy/{channel}/{rest}` is forwarded to `rest` on the channel's tunnel
//! port.

use axum::{
    extract::{Request, State},
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::error::ApiError;
use crate::api::handlers::AppState;

const PROXY_PREFIX: &str = "/proxy/";

/// Split a proxy path into its channel segment and the remainder
fn split_path(path: &str) -> Option<(&str, &str)> {
    let tail = path.strip_prefix(PROXY_PREFIX)?;
    let (channel, rest) = tail.split_once('/').unwrap_or((tail, ""));
    if channel.is_empty() {
        return None;
    }
    Some((channel, rest))
}

/// Forward a request through a channel
///
/// ANY /proxy/{channel}/{*rest}
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();
    let (channel, rest) =
        split_path(&path).ok_or_else(|| ApiError::NotFound("channel not found".into()))?;

    let channel_id: i64 = channel
        .parse()
        .map_err(|_| ApiError::NotFound(format!("channel {channel} not found")))?;

    let port = state
        .routes
        .resolve(channel_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("channel {channel_id} not found")))?;

    debug!(channel_id = channel_id, port = port, rest = %rest, "Proxying request");

    state
        .forwarder
        .forward(channel, port, rest, request)
        .await
        .map_err(|e| {
            warn!(error = %e, channel_id = channel_id, "Upstream request failed");
            ApiError::from(e)
        })
}
