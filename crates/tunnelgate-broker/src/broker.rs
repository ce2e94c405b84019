//! Broker trait

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;
use crate::types::{NewClient, NewTunnel, TunnelInfo};

/// Broker operations, for error reporting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOperation {
    CreateClient,
    CreateTunnel,
    GetTunnel,
    DeleteClient,
}

impl fmt::Display for BrokerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerOperation::CreateClient => write!(f, "create client"),
            BrokerOperation::CreateTunnel => write!(f, "create tunnel"),
            BrokerOperation::GetTunnel => write!(f, "get tunnel"),
            BrokerOperation::DeleteClient => write!(f, "delete client"),
        }
    }
}

/// Operations tunnelgate performs against the tunnel broker
///
/// Every call either succeeds or reports a structured failure. There is no
/// retry here; callers decide what a failure means.
#[async_trait]
pub trait TunnelBroker: Send + Sync {
    /// Register a tunnel client and return its broker id
    async fn create_client(&self, client: &NewClient) -> Result<i64>;

    /// Create a tunnel for an existing client and return its broker id
    async fn create_tunnel(&self, tunnel: &NewTunnel) -> Result<i64>;

    /// Look up a tunnel, including its allocated port and client state
    async fn get_tunnel(&self, tunnel_id: i64) -> Result<TunnelInfo>;

    /// Remove a client and every tunnel it owns
    async fn delete_client(&self, client_id: i64) -> Result<()>;

    /// Get a description of this broker (for logging)
    fn description(&self) -> &str {
        "tunnel broker"
    }
}
