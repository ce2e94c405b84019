//! Local API request handlers

pub mod npc;

pub use npc::{
    auth, check, csr, start, stop, AgentState, AuthRequest, CsrResponse, MessageResponse,
};
