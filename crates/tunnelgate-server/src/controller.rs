//! Channel issuance, revocation and liveness
//!
//! Issuance runs the broker steps in order and stops at the first failure.
//! Nothing is rolled back: a broker client created before a later step fails
//! stays behind, exactly like one whose channel is later superseded.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tunnelgate_broker::{NewClient, NewTunnel, TunnelBroker};
use tunnelgate_core::{parse_request, CertificateAuthority};

use crate::routing::RouteCache;
use crate::storage::{ChannelRecord, ChannelStore, NewChannel, StorageError};

/// Issuance failures, one per step
///
/// The messages are part of the provisioning API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IssuanceError {
    #[error("param error")]
    Param,
    #[error("key is illegal")]
    IllegalKey,
    #[error("csr is illegal")]
    IllegalCsr,
    #[error("gen client error")]
    GenClient,
    #[error("gen tunnel error")]
    GenTunnel,
    #[error("get tunnel error")]
    GetTunnel,
    #[error("insert db error")]
    InsertDb,
    #[error("gen cert error")]
    GenCert,
}

/// Provisioning request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceRequest {
    /// Shared provisioning secret
    #[serde(default)]
    pub key: String,

    /// PEM-encoded CSR from the requesting machine
    #[serde(default)]
    pub csr: String,

    /// Grant expiry, unix seconds
    #[serde(default)]
    pub expired_time: i64,

    /// Free-text description
    #[serde(default)]
    pub desc: String,
}

/// Result of a successful issuance
#[derive(Debug)]
pub struct IssuedChannel {
    /// PEM-encoded leaf certificate
    pub certificate: String,

    /// Record the certificate was issued from
    pub record: ChannelRecord,

    /// Background revocation of the machine's older channels
    pub sweep: JoinHandle<()>,
}

/// Outcome of a revocation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevocationReport {
    /// Channels whose broker client was deleted and record soft-deleted
    pub revoked: Vec<i64>,

    /// Channels left active because the broker refused the deletion
    pub failed: Vec<i64>,
}

/// Settings that shape issued channels
#[derive(Debug, Clone)]
pub struct IssuanceSettings {
    /// Shared provisioning secret
    pub auth_key: String,

    /// Broker bridge address written into every record
    pub bridge_host: String,

    /// Tunnel target on the requesting machine
    pub client_port: String,
}

/// Server-side channel controller
#[derive(Clone)]
pub struct ChannelController {
    store: Arc<dyn ChannelStore>,
    broker: Arc<dyn TunnelBroker>,
    ca: Arc<CertificateAuthority>,
    routes: Arc<RouteCache>,
    settings: Arc<IssuanceSettings>,
}

impl ChannelController {
    pub fn new(
        store: Arc<dyn ChannelStore>,
        broker: Arc<dyn TunnelBroker>,
        ca: Arc<CertificateAuthority>,
        routes: Arc<RouteCache>,
        settings: IssuanceSettings,
    ) -> Self {
        Self {
            store,
            broker,
            ca,
            routes,
            settings: Arc::new(settings),
        }
    }

    /// Issue a channel certificate for the machine named in `request.csr`
    ///
    /// On success the machine's other active channels are revoked in the
    /// background; the caller does not wait for that.
    pub async fn handle_issuance(&self, request: IssuanceRequest) -> Result<IssuedChannel, IssuanceError> {
        if request.key.is_empty() || request.csr.is_empty() || request.desc.is_empty() {
            return Err(IssuanceError::Param);
        }
        let expires_at = Utc
            .timestamp_opt(request.expired_time, 0)
            .single()
            .filter(|_| request.expired_time > 0)
            .ok_or(IssuanceError::Param)?;

        if request.key != self.settings.auth_key {
            warn!("Issuance request with wrong key");
            return Err(IssuanceError::IllegalKey);
        }

        let claims = parse_request(&request.csr).map_err(|e| {
            warn!(error = %e, "Rejected CSR");
            IssuanceError::IllegalCsr
        })?;
        let machine_id = claims.machine_id;

        let verify_key = format!("{}-{}", machine_id, Utc::now().timestamp());
        let client_id = self
            .broker
            .create_client(&NewClient::new(&request.desc, &verify_key))
            .await
            .map_err(|e| {
                error!(error = %e, machine_id = %machine_id, "gen client error");
                IssuanceError::GenClient
            })?;

        let tunnel_id = self
            .broker
            .create_tunnel(&NewTunnel::tcp(&request.desc, &self.settings.client_port, client_id))
            .await
            .map_err(|e| {
                error!(error = %e, client_id = client_id, "gen tunnel error");
                IssuanceError::GenTunnel
            })?;

        let tunnel = self.broker.get_tunnel(tunnel_id).await.map_err(|e| {
            error!(error = %e, tunnel_id = tunnel_id, "get tunnel error");
            IssuanceError::GetTunnel
        })?;

        let record = self
            .store
            .insert(NewChannel {
                description: request.desc,
                broker_host: self.settings.bridge_host.clone(),
                client_id,
                client_key: verify_key,
                tunnel_id,
                tunnel_port: tunnel.port,
                machine_id: machine_id.clone(),
                expires_at,
            })
            .await
            .map_err(|e| {
                error!(error = %e, machine_id = %machine_id, "insert db error");
                IssuanceError::InsertDb
            })?;

        let certificate = self.ca.issue(&record.to_grant()).map_err(|e| {
            error!(error = %e, channel_id = record.channel_id, "gen cert error");
            IssuanceError::GenCert
        })?;

        info!(
            channel_id = record.channel_id,
            machine_id = %machine_id,
            tunnel_port = record.tunnel_port,
            "Issued channel"
        );

        let sweep = {
            let controller = self.clone();
            let keep = record.channel_id;
            tokio::spawn(async move {
                if let Err(e) = controller.revoke_machine(&machine_id, Some(keep)).await {
                    warn!(error = %e, machine_id = %machine_id, "Superseded channel sweep failed");
                }
            })
        };

        Ok(IssuedChannel {
            certificate,
            record,
            sweep,
        })
    }

    /// Revoke every active channel of `machine_id`
    pub async fn handle_revocation(&self, machine_id: &str) -> Result<RevocationReport, StorageError> {
        self.revoke_machine(machine_id, None).await
    }

    /// Revoke the active channels of `machine_id`, except `keep`
    ///
    /// Each channel's broker client is deleted first; only channels whose
    /// deletion succeeded, or whose client the broker no longer has, are
    /// soft-deleted and dropped from the route cache.
    pub async fn revoke_machine(
        &self,
        machine_id: &str,
        keep: Option<i64>,
    ) -> Result<RevocationReport, StorageError> {
        let channels = self.store.list_active_by_machine(machine_id).await?;

        let mut report = RevocationReport::default();
        for channel in channels.iter().filter(|c| Some(c.channel_id) != keep) {
            match self.broker.delete_client(channel.client_id).await {
                Ok(()) => report.revoked.push(channel.channel_id),
                Err(e) if e.is_not_found() => {
                    info!(
                        channel_id = channel.channel_id,
                        client_id = channel.client_id,
                        "Broker client already gone"
                    );
                    report.revoked.push(channel.channel_id);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        channel_id = channel.channel_id,
                        client_id = channel.client_id,
                        "Broker refused client deletion"
                    );
                    report.failed.push(channel.channel_id);
                }
            }
        }

        if !report.revoked.is_empty() {
            self.store.soft_delete(&report.revoked).await?;
            for id in &report.revoked {
                self.routes.invalidate(*id);
            }
        }

        info!(
            machine_id = %machine_id,
            revoked = ?report.revoked,
            failed = ?report.failed,
            "Revocation sweep complete"
        );
        Ok(report)
    }

    /// Whether `channel_id` is active, unexpired and reported healthy
    pub async fn check_channel(&self, channel_id: i64) -> bool {
        let record = match self.store.get(channel_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(channel_id = channel_id, "Check for unknown channel");
                return false;
            }
            Err(e) => {
                warn!(error = %e, channel_id = channel_id, "Check lookup failed");
                return false;
            }
        };

        if record.to_grant().is_expired_at(Utc::now()) {
            debug!(channel_id = channel_id, "Channel expired");
            return false;
        }

        match self.broker.get_tunnel(record.tunnel_id).await {
            Ok(tunnel) => tunnel.is_available(),
            Err(e) => {
                warn!(error = %e, channel_id = channel_id, "Tunnel lookup failed");
                false
            }
        }
    }
}
