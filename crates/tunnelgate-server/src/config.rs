//! Server configuration
//!
//! Read once at startup from `TUNNELGATE_*` environment variables.

use std::path::PathBuf;
use thiserror::Error;

use crate::routing::cache::DEFAULT_CAPACITY;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct NpsConfig {
    /// Base URL of the NPS web API
    pub api_url: String,
    /// NPS web API key
    pub api_key: String,
    /// Bridge address tunnel clients connect to
    pub bridge_host: String,
    /// Tunnel target on the client side
    pub client_port: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub ca_cert_path: PathBuf,
    pub ca_key_path: PathBuf,
    pub auth_key: String,
    pub nps: NpsConfig,
    pub route_cache_capacity: usize,
    pub upstream_host: String,
}

impl ServerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let require = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let data_dir = PathBuf::from(get("TUNNELGATE_DATA_DIR", "./data"));

        let route_cache_capacity = {
            let raw = get("TUNNELGATE_ROUTE_CACHE", &DEFAULT_CAPACITY.to_string());
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "TUNNELGATE_ROUTE_CACHE",
                        value: raw,
                    })
                }
            }
        };

        Ok(Self {
            listen_addr: get("TUNNELGATE_SERVER_ADDR", "0.0.0.0:20109"),
            database_url: lookup("TUNNELGATE_DATABASE_URL").filter(|v| !v.is_empty()),
            ca_cert_path: lookup("TUNNELGATE_CA_CERT")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("ca_cert.pem")),
            ca_key_path: lookup("TUNNELGATE_CA_KEY")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("ca_key.pem")),
            auth_key: require("TUNNELGATE_AUTH_KEY")?,
            nps: NpsConfig {
                api_url: get("TUNNELGATE_NPS_API", "http://127.0.0.1:20100"),
                api_key: require("TUNNELGATE_NPS_API_KEY")?,
                bridge_host: get("TUNNELGATE_NPS_BRIDGE", "127.0.0.1:20102"),
                client_port: get("TUNNELGATE_NPS_CLIENT_PORT", "32301"),
            },
            route_cache_capacity,
            upstream_host: get("TUNNELGATE_UPSTREAM_HOST", "127.0.0.1"),
            data_dir,
        })
    }
}
