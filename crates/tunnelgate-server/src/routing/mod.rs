//! Per-channel routing
//!
//! Resolves a channel id to the backend port the broker allocated and
//! forwards requests there, rewriting the HTML base-path marker so relative
//! assets resolve under `/proxy/{channel}/`.

pub mod cache;
pub mod forward;
pub mod rewrite;

pub use cache::RouteCache;
pub use forward::{ForwardError, Forwarder};
