//! Broker request and response types

use serde::Deserialize;

/// A tunnel client to register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClient {
    /// Human-readable remark shown in the broker UI
    pub remark: String,

    /// Key the tunnel client authenticates with
    pub verify_key: String,

    /// Whether the client may connect with a local config file
    pub config_conn_allow: bool,

    /// Compress tunnel traffic
    pub compress: bool,

    /// Encrypt tunnel traffic
    pub crypt: bool,
}

impl NewClient {
    /// A client that may only connect with its verify key, compressed and encrypted
    pub fn new(remark: impl Into<String>, verify_key: impl Into<String>) -> Self {
        Self {
            remark: remark.into(),
            verify_key: verify_key.into(),
            config_conn_allow: false,
            compress: true,
            crypt: true,
        }
    }

    /// Form fields for `/client/add/`
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("remark", self.remark.clone()),
            ("vkey", self.verify_key.clone()),
            ("config_conn_allow", flag(self.config_conn_allow)),
            ("compress", flag(self.compress)),
            ("crypt", flag(self.crypt)),
        ]
    }
}

/// A TCP tunnel to create for an existing client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTunnel {
    /// Human-readable remark shown in the broker UI
    pub remark: String,

    /// Target on the client side, e.g. `"32301"` or `"127.0.0.1:32301"`
    pub target: String,

    /// Owning client
    pub client_id: i64,
}

impl NewTunnel {
    pub fn tcp(remark: impl Into<String>, target: impl Into<String>, client_id: i64) -> Self {
        Self {
            remark: remark.into(),
            target: target.into(),
            client_id,
        }
    }

    /// Form fields for `/index/add/`
    ///
    /// The listening port is left for the broker to allocate.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("type", "tcp".to_string()),
            ("remark", self.remark.clone()),
            ("target", self.target.clone()),
            ("client_id", self.client_id.to_string()),
        ]
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

/// State of a tunnel client as the broker sees it
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientStatus {
    #[serde(rename = "Id", default)]
    pub id: i64,

    /// Client is enabled
    #[serde(rename = "Status", default)]
    pub enabled: bool,

    /// Client currently holds a bridge connection
    #[serde(rename = "IsConnect", default)]
    pub connected: bool,
}

/// A tunnel as the broker reports it
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TunnelInfo {
    #[serde(rename = "Id")]
    pub id: i64,

    /// Port the broker listens on for this tunnel
    #[serde(rename = "Port")]
    pub port: u16,

    /// Tunnel is enabled
    #[serde(rename = "Status", default)]
    pub enabled: bool,

    /// Owning client, absent when the broker has lost it
    #[serde(rename = "Client", default)]
    pub client: Option<ClientStatus>,
}

impl TunnelInfo {
    /// Tunnel and its client are both enabled
    pub fn is_available(&self) -> bool {
        self.enabled && self.client.as_ref().is_some_and(|c| c.enabled)
    }
}
