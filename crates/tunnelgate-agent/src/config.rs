//! Agent configuration
//!
//! Read once at startup from `TUNNELGATE_*` environment variables.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::supervisor::DEFAULT_MAX_RESTARTS;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Loopback address of the local API
    pub listen_addr: String,
    pub data_dir: PathBuf,
    /// Trusted root for channel certificates
    pub ca_cert_path: PathBuf,
    /// Tunnel-client executable
    pub npc_path: PathBuf,
    pub max_restarts: u32,
}

impl AgentConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = PathBuf::from(lookup("TUNNELGATE_DATA_DIR").unwrap_or_else(|| "./data".into()));

        let max_restarts = match lookup("TUNNELGATE_MAX_RESTARTS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "TUNNELGATE_MAX_RESTARTS",
                value: raw,
            })?,
            None => DEFAULT_MAX_RESTARTS,
        };

        Ok(Self {
            listen_addr: lookup("TUNNELGATE_AGENT_ADDR").unwrap_or_else(|| "127.0.0.1:20108".into()),
            ca_cert_path: lookup("TUNNELGATE_CA_CERT")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("ca_cert.pem")),
            npc_path: lookup("TUNNELGATE_NPC_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_npc_path(&data_dir)),
            max_restarts,
            data_dir,
        })
    }

    /// Where the active channel certificate is kept
    pub fn cert_path(&self) -> PathBuf {
        self.data_dir.join("cert.pem")
    }

    /// Where the machine identity is cached
    pub fn machine_id_path(&self) -> PathBuf {
        self.data_dir.join("machine_id")
    }
}

/// Bundled tunnel client for this platform
pub fn default_npc_path(data_dir: &Path) -> PathBuf {
    data_dir
        .join("sidecar")
        .join(format!("{}_{}_client", std::env::consts::OS, std::env::consts::ARCH))
        .join("npc")
}
