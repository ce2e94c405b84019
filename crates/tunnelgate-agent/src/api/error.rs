//! Local API errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::controller::ControllerError;

/// Local API error type
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AgentError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AgentError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AgentError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<ControllerError> for AgentError {
    fn from(err: ControllerError) -> Self {
        let message = err.to_string();
        match err {
            ControllerError::Credential(_)
            | ControllerError::MissingLaunchCredentials
            | ControllerError::IdentityMismatch { .. } => AgentError::BadRequest(message),
            ControllerError::NotAuthorized => AgentError::NotFound(message),
            ControllerError::Supervisor(_) | ControllerError::Io(_) => AgentError::Internal(message),
        }
    }
}
