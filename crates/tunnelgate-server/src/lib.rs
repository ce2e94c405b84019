//! Tunnelgate Server
//!
//! The server hands out temporary tunnel channels. For each provisioning
//! request it:
//! - Validates the shared key and the machine's CSR
//! - Creates a broker client and a TCP tunnel for the machine
//! - Records the channel and signs a certificate carrying its grant
//! - Revokes the machine's older channels in the background
//!
//! It also fronts each channel with a reverse proxy under
//! `/proxy/{channel}/`, rewriting the HTML base-path marker so single-page
//! frontends resolve their assets through the proxy.
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `POST /nps/signature` - Issue a channel certificate
//! - `DELETE /nps/delete?machineId=` - Revoke a machine's channels
//! - `GET /nps/check?channelId=` - Whether a channel is usable
//! - `ANY /proxy/{channel}/{*rest}` - Forward to the channel's backend

pub mod api;
pub mod config;
pub mod controller;
pub mod routing;
pub mod storage;

pub use api::create_router;
pub use api::handlers::AppState;
pub use config::{ConfigError, NpsConfig, ServerConfig};
pub use controller::{
    ChannelController, IssuanceError, IssuanceRequest, IssuanceSettings, IssuedChannel,
    RevocationReport,
};
pub use routing::{ForwardError, Forwarder, RouteCache};
pub use storage::{ChannelRecord, ChannelStore, MemoryStore, NewChannel, StorageError};
