//! Error types for broker calls

use thiserror::Error;

use crate::broker::BrokerOperation;

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur talking to the broker
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Request never produced a usable response
    #[error("broker transport error: {0}")]
    Transport(String),

    /// Broker answered with a failure status
    #[error("broker rejected {operation}: {message}")]
    Rejected {
        operation: BrokerOperation,
        message: String,
    },

    /// Broker has no object with this id
    #[error("{operation}: {id} not found")]
    NotFound { operation: BrokerOperation, id: i64 },

    /// Broker answered with something we could not decode
    #[error("invalid broker response: {0}")]
    InvalidResponse(String),
}

impl BrokerError {
    /// Shorthand for a rejection
    pub fn rejected(operation: BrokerOperation, message: impl Into<String>) -> Self {
        BrokerError::Rejected {
            operation,
            message: message.into(),
        }
    }

    /// Whether the broker reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::NotFound { .. })
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        BrokerError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::InvalidResponse(err.to_string())
    }
}
