//! API request handlers

pub mod channels;
pub mod proxy;

pub use channels::{
    check_channel, issue_channel, revoke_machine, AppState, CheckQuery, CheckResponse,
    RevokeQuery, RevokeResponse, SignatureResponse,
};
pub use proxy::proxy;
