//! Tunnel Broker
//!
//! The broker is the external service that owns tunnel clients, tunnels and
//! backend ports. This crate defines the operations tunnelgate needs from it
//! and implements them against the NPS web API.
//!
//! ## Backends
//!
//! - **NPS**: form-encoded web API authenticated with a time-salted MD5 key
//! - **Mock**: in-memory broker with failure injection, for tests
//!
//! ## Usage
//!
//! ```ignore
//! use tunnelgate_broker::{backends::NpsBroker, NewClient, TunnelBroker};
//!
//! let broker = NpsBroker::new("http://127.0.0.1:20100", "api-key");
//! let client_id = broker
//!     .create_client(&NewClient::new("lab unit", "m-1700000000"))
//!     .await?;
//! ```

pub mod backends;
pub mod broker;
pub mod error;
pub mod types;

pub use broker::{BrokerOperation, TunnelBroker};
pub use error::{BrokerError, Result};
pub use types::{ClientStatus, NewClient, NewTunnel, TunnelInfo};
