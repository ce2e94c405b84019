//! # Tunnelgate Core
//!
//! Types and certificate machinery shared by the tunnelgate server and agent.
//!
//! ## Key Concepts
//!
//! - **Machine identity**: a stable fingerprint of the requesting host, the
//!   ownership key for channels
//! - **Request**: a PKCS#10 CSR signed by a throwaway key, carrying
//!   [`RequestClaims`] in a private extension
//! - **Channel grant**: the tunnel credentials for one channel, carried as a
//!   [`ChannelGrant`] in a private extension of a CA-signed leaf certificate
//!
//! ## Trust
//!
//! Only the leaf certificate is a trust statement. The CSR signature is a
//! well-formedness check; callers are authorized by a shared secret instead.
//! A certificate is accepted when it chains to the configured root, its
//! validity window contains the current time, and its grant extension decodes.

pub mod ca;
pub mod csr;
pub mod error;
pub mod extension;
pub mod identity;
pub mod types;
pub mod verify;

pub use ca::{CaMaterial, CertificateAuthority};
pub use csr::{build_request, build_request_at, parse_request};
pub use error::{CredentialError, Result};
pub use identity::MachineIdentity;
pub use types::{ChannelGrant, RequestClaims};
pub use verify::CertificateVerifier;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
