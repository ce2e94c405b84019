//! Payloads carried inside request and certificate extensions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Claims a requesting machine embeds in its CSR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestClaims {
    /// Fingerprint of the requesting host
    pub machine_id: String,

    /// When the request was built
    pub requested_at: DateTime<Utc>,
}

/// Snapshot of a channel record, embedded in the issued certificate
///
/// The agent launches the tunnel client from these fields alone, so every
/// value needed on the requester side has to be here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelGrant {
    /// Store-assigned channel id
    pub channel_id: i64,

    /// Free-text description supplied at issuance
    pub description: String,

    /// Broker bridge host the tunnel client connects to
    pub broker_host: String,

    /// Broker-side client id
    pub client_id: i64,

    /// Broker-side client verify key
    pub client_key: String,

    /// Broker-side tunnel id
    pub tunnel_id: i64,

    /// Port the broker allocated for the tunnel
    pub tunnel_port: u16,

    /// Owning machine
    pub machine_id: String,

    /// When the grant stops being honored
    pub expires_at: DateTime<Utc>,
}

impl ChannelGrant {
    /// Whether the grant has lapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the grant carries enough to launch a tunnel client
    pub fn has_launch_credentials(&self) -> bool {
        !self.broker_host.trim().is_empty() && !self.client_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant() -> ChannelGrant {
        ChannelGrant {
            channel_id: 7,
            description: "lab printer".into(),
            broker_host: "nps.example:8024".into(),
            client_id: 11,
            client_key: "m-1700000000".into(),
            tunnel_id: 13,
            tunnel_port: 40001,
            machine_id: "abc".into(),
            expires_at: Utc::now() + Duration::days(1),
        }
    }

    #[test]
    fn test_grant_wire_names() {
        let value = serde_json::to_value(grant()).unwrap();
        assert_eq!(value["channelId"], 7);
        assert_eq!(value["tunnelPort"], 40001);
        assert_eq!(value["brokerHost"], "nps.example:8024");
        assert!(value["expiresAt"].is_string());
    }

    #[test]
    fn test_expiry() {
        let g = grant();
        assert!(!g.is_expired_at(Utc::now()));
        assert!(g.is_expired_at(g.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn test_launch_credentials_required() {
        let mut g = grant();
        assert!(g.has_launch_credentials());
        g.client_key = "  ".into();
        assert!(!g.has_launch_credentials());
        g.client_key = "k".into();
        g.broker_host = String::new();
        assert!(!g.has_launch_credentials());
    }
}
