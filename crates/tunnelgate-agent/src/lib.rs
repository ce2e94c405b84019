//! Tunnelgate Agent
//!
//! Runs on the machine that requests a channel. It:
//! - Mints certificate requests carrying this machine's identity
//! - Accepts the signed channel certificate and verifies it against the
//!   trusted root
//! - Runs the NPS tunnel client (`npc`) with the credentials from the
//!   certificate, restarting it under a bounded budget
//!
//! ## API Endpoints (loopback)
//!
//! - `GET /health` - Liveness check
//! - `GET /npc/check` - Active certificate and tunnel-client status
//! - `GET /npc/csr` - Fresh certificate request
//! - `POST /npc/auth` - Load a signed certificate
//! - `POST /npc/start` - Restart the tunnel client
//! - `POST /npc/stop` - Stop the tunnel client

pub mod api;
pub mod config;
pub mod controller;
pub mod supervisor;

pub use api::create_router;
pub use api::handlers::AgentState;
pub use config::{AgentConfig, ConfigError};
pub use controller::{AgentController, AgentSettings, ControllerError, CredentialSnapshot};
pub use supervisor::{ProcessStatus, Supervisor, SupervisorOptions};
