//! Mock Broker
//!
//! For testing purposes - keeps clients and tunnels in memory.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::broker::{BrokerOperation, TunnelBroker};
use crate::error::{BrokerError, Result};
use crate::types::{ClientStatus, NewClient, NewTunnel, TunnelInfo};

const FIRST_PORT: u16 = 40000;

#[derive(Default)]
struct State {
    next_id: i64,
    clients: HashMap<i64, NewClient>,
    tunnels: HashMap<i64, (NewTunnel, TunnelInfo)>,
    failing: HashSet<BrokerOperation>,
    calls: HashMap<BrokerOperation, usize>,
}

/// In-memory broker
///
/// Ids are sequential across clients and tunnels, ports are sequential from
/// 40000. Any operation can be made to fail with [`MockBroker::fail`].
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<State>,
}

impl MockBroker {
    /// Create an empty mock broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call to `operation` fail
    pub fn fail(&self, operation: BrokerOperation) {
        self.state().failing.insert(operation);
    }

    /// Let `operation` succeed again
    pub fn recover(&self, operation: BrokerOperation) {
        self.state().failing.remove(&operation);
    }

    /// Number of calls made to `operation`, successful or not
    pub fn calls(&self, operation: BrokerOperation) -> usize {
        self.state().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Whether `client_id` is still registered
    pub fn has_client(&self, client_id: i64) -> bool {
        self.state().clients.contains_key(&client_id)
    }

    /// Verify key a client was registered with
    pub fn client_key(&self, client_id: i64) -> Option<String> {
        self.state()
            .clients
            .get(&client_id)
            .map(|c| c.verify_key.clone())
    }

    /// Override the reported state of a tunnel and its client
    pub fn set_status(&self, tunnel_id: i64, tunnel_enabled: bool, client_enabled: bool) {
        let mut state = self.state();
        if let Some((_, info)) = state.tunnels.get_mut(&tunnel_id) {
            info.enabled = tunnel_enabled;
            if let Some(client) = info.client.as_mut() {
                client.enabled = client_enabled;
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, operation: BrokerOperation) -> Result<MutexGuard<'_, State>> {
        let mut state = self.state();
        *state.calls.entry(operation).or_default() += 1;
        if state.failing.contains(&operation) {
            return Err(BrokerError::rejected(operation, "injected failure"));
        }
        Ok(state)
    }
}

#[async_trait]
impl TunnelBroker for MockBroker {
    async fn create_client(&self, client: &NewClient) -> Result<i64> {
        let mut state = self.enter(BrokerOperation::CreateClient)?;
        state.next_id += 1;
        let id = state.next_id;
        state.clients.insert(id, client.clone());
        Ok(id)
    }

    async fn create_tunnel(&self, tunnel: &NewTunnel) -> Result<i64> {
        let mut state = self.enter(BrokerOperation::CreateTunnel)?;
        if !state.clients.contains_key(&tunnel.client_id) {
            return Err(BrokerError::rejected(
                BrokerOperation::CreateTunnel,
                format!("client {} not found", tunnel.client_id),
            ));
        }

        state.next_id += 1;
        let id = state.next_id;
        let port = FIRST_PORT + state.tunnels.len() as u16;
        let info = TunnelInfo {
            id,
            port,
            enabled: true,
            client: Some(ClientStatus {
                id: tunnel.client_id,
                enabled: true,
                connected: false,
            }),
        };
        state.tunnels.insert(id, (tunnel.clone(), info));
        Ok(id)
    }

    async fn get_tunnel(&self, tunnel_id: i64) -> Result<TunnelInfo> {
        let state = self.enter(BrokerOperation::GetTunnel)?;
        state
            .tunnels
            .get(&tunnel_id)
            .map(|(_, info)| info.clone())
            .ok_or(BrokerError::NotFound {
                operation: BrokerOperation::GetTunnel,
                id: tunnel_id,
            })
    }

    async fn delete_client(&self, client_id: i64) -> Result<()> {
        let mut state = self.enter(BrokerOperation::DeleteClient)?;
        if state.clients.remove(&client_id).is_none() {
            return Err(BrokerError::NotFound {
                operation: BrokerOperation::DeleteClient,
                id: client_id,
            });
        }
        state.tunnels.retain(|_, (tunnel, _)| tunnel.client_id != client_id);
        Ok(())
    }

    fn description(&self) -> &str {
        "mock broker"
    }
}
