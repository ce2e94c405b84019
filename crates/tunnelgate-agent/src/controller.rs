//! Client-side channel controller
//!
//! Holds the active channel certificate and the supervisor running the
//! tunnel client with the credentials it carries. Loading a certificate
//! verifies it, persists it and replaces the supervisor; a credential the
//! broker refuses is cleared.
//!
//! Credential changes and start/stop are serialized by an async lock and
//! may await orphan sweeps. The lock around the active credential is only
//! held to read or swap it, so status reads never wait on a sweep.

use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};
use tunnelgate_core::{build_request, CertificateVerifier, ChannelGrant, CredentialError, MachineIdentity};

use crate::supervisor::{
    reap_orphans, LaunchSpec, NpcClassifier, OutputClassifier, ProcessStatus, Supervisor,
    SupervisorError, SupervisorEvent, SupervisorOptions,
};

/// Controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("certificate rejected: {0}")]
    Credential(#[from] CredentialError),

    #[error("certificate carries no tunnel credentials")]
    MissingLaunchCredentials,

    #[error("certificate was issued to machine {found}, this machine is {expected}")]
    IdentityMismatch { expected: String, found: String },

    #[error("not authorized")]
    NotAuthorized,

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("certificate file error: {0}")]
    Io(#[from] io::Error),
}

/// Paths and supervisor tuning for the controller
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Where the active certificate is persisted
    pub cert_path: PathBuf,
    /// Tunnel-client executable
    pub program: PathBuf,
    pub supervisor: SupervisorOptions,
}

/// Current credential and tunnel-client state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSnapshot {
    /// Active certificate PEM, empty when none is loaded
    pub cert: String,
    pub cert_data: Option<ChannelGrant>,
    pub npc_status: ProcessStatus,
}

/// Tunnel-client arguments for a grant
pub fn launch_args(grant: &ChannelGrant) -> Vec<String> {
    vec![
        format!("-server={}", grant.broker_host),
        format!("-vkey={}", grant.client_key),
        "-tls_enable=true".to_string(),
    ]
}

/// Client-side controller
#[derive(Clone)]
pub struct AgentController {
    inner: Arc<Inner>,
}

struct Inner {
    identity: MachineIdentity,
    verifier: CertificateVerifier,
    settings: AgentSettings,
    classifier: Arc<dyn OutputClassifier>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    transitions: AsyncMutex<()>,
    active: Mutex<Option<Active>>,
}

struct Active {
    cert: String,
    grant: ChannelGrant,
    supervisor: Supervisor,
}

impl AgentController {
    /// Create a controller with no credential loaded
    ///
    /// Must be called inside a Tokio runtime: supervisor notifications are
    /// handled on a background task.
    pub fn new(identity: MachineIdentity, verifier: CertificateVerifier, settings: AgentSettings) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            identity,
            verifier,
            settings,
            classifier: Arc::new(NpcClassifier),
            events,
            transitions: AsyncMutex::new(()),
            active: Mutex::new(None),
        });
        tokio::spawn(watch_events(Arc::downgrade(&inner), receiver));
        Self { inner }
    }

    pub fn identity(&self) -> &MachineIdentity {
        &self.inner.identity
    }

    /// Load the persisted certificate, if there is one, and start the client
    pub async fn load_persisted(&self) -> Result<Option<ChannelGrant>, ControllerError> {
        let path = &self.inner.settings.cert_path;
        if !path.exists() {
            info!(path = %path.display(), "No persisted certificate");
            return Ok(None);
        }
        let pem = std::fs::read_to_string(path)?;
        self.activate(&pem, false).await.map(Some)
    }

    /// Verify `pem`, persist it and restart the tunnel client with it
    ///
    /// Nothing is persisted or started when verification fails.
    pub async fn load_certificate(&self, pem: &str) -> Result<ChannelGrant, ControllerError> {
        self.activate(pem, true).await
    }

    /// Restart the tunnel client with a fresh restart budget
    pub async fn start(&self) -> Result<(), ControllerError> {
        let _transition = self.inner.transitions.lock().await;
        let supervisor = self.inner.supervisor().ok_or(ControllerError::NotAuthorized)?;
        supervisor.stop().await;
        supervisor.start(true)?;
        Ok(())
    }

    /// Stop the tunnel client
    pub async fn stop(&self) {
        let _transition = self.inner.transitions.lock().await;
        match self.inner.supervisor() {
            Some(supervisor) => supervisor.stop().await,
            None if self.inner.settings.supervisor.reap_orphans => {
                reap_orphans(self.inner.settings.program.clone()).await;
            }
            None => {}
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.inner
            .active()
            .as_ref()
            .map(|a| a.supervisor.status())
            .unwrap_or(ProcessStatus::Stopped)
    }

    pub fn snapshot(&self) -> CredentialSnapshot {
        let active = self.inner.active();
        match active.as_ref() {
            Some(active) => CredentialSnapshot {
                cert: active.cert.clone(),
                cert_data: Some(active.grant.clone()),
                npc_status: active.supervisor.status(),
            },
            None => CredentialSnapshot {
                cert: String::new(),
                cert_data: None,
                npc_status: ProcessStatus::Stopped,
            },
        }
    }

    /// Fresh certificate request for this machine
    pub fn new_request(&self) -> Result<String, ControllerError> {
        Ok(build_request(self.inner.identity.as_str())?)
    }

    async fn activate(&self, pem: &str, persist: bool) -> Result<ChannelGrant, ControllerError> {
        let grant = self.inner.verifier.verify(pem).map_err(|e| {
            warn!(error = %e, "Certificate failed verification");
            e
        })?;

        if !grant.has_launch_credentials() {
            return Err(ControllerError::MissingLaunchCredentials);
        }
        if grant.machine_id != self.inner.identity.as_str() {
            return Err(ControllerError::IdentityMismatch {
                expected: self.inner.identity.to_string(),
                found: grant.machine_id,
            });
        }

        let _transition = self.inner.transitions.lock().await;

        if persist {
            let path = &self.inner.settings.cert_path;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, pem)?;
        }

        let supervisor = Supervisor::new(
            LaunchSpec::new(&self.inner.settings.program, launch_args(&grant)),
            self.inner.classifier.clone(),
            self.inner.settings.supervisor.clone(),
            Some(self.inner.events.clone()),
        );

        let previous = self.inner.active().take();
        match previous {
            // Stopping sweeps for orphans of the same program
            Some(previous) => previous.supervisor.stop().await,
            None => {
                supervisor.sweep_orphans().await;
            }
        }

        *self.inner.active() = Some(Active {
            cert: pem.to_string(),
            grant: grant.clone(),
            supervisor: supervisor.clone(),
        });

        info!(
            channel_id = grant.channel_id,
            broker_host = %grant.broker_host,
            expires_at = %grant.expires_at,
            "Loaded channel certificate"
        );

        supervisor.start(true)?;
        Ok(grant)
    }
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn supervisor(&self) -> Option<Supervisor> {
        self.active().as_ref().map(|a| a.supervisor.clone())
    }

    /// Drop the credential whose supervisor reported a rejection
    async fn clear_rejected(&self, instance: u64) {
        let _transition = self.transitions.lock().await;
        let is_current = self
            .active()
            .as_ref()
            .is_some_and(|a| a.supervisor.instance() == instance);
        if !is_current {
            return;
        }
        let Some(rejected) = self.active().take() else {
            return;
        };

        rejected.supervisor.stop().await;
        warn!(
            channel_id = rejected.grant.channel_id,
            "Broker rejected the channel credential, clearing it"
        );

        match std::fs::remove_file(&self.settings.cert_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to remove rejected certificate"),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = active.take() {
            active.supervisor.halt();
        }
    }
}

async fn watch_events(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<SupervisorEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            SupervisorEvent::CredentialRejected { instance } => inner.clear_rejected(instance).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_launch_args() {
        let grant = ChannelGrant {
            channel_id: 1,
            description: "unit".into(),
            broker_host: "175.27.0.1:20102".into(),
            client_id: 2,
            client_key: "m-1-1700000000".into(),
            tunnel_id: 3,
            tunnel_port: 40000,
            machine_id: "m-1".into(),
            expires_at: Utc::now(),
        };
        assert_eq!(
            launch_args(&grant),
            vec![
                "-server=175.27.0.1:20102",
                "-vkey=m-1-1700000000",
                "-tls_enable=true"
            ]
        );
    }
}
