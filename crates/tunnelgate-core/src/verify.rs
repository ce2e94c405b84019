//! Certificate verification
//!
//! The trust store holds exactly one root. A leaf is accepted when it names
//! the root as issuer, carries the root's signature, is inside its validity
//! window and carries a decodable channel grant.

use chrono::{DateTime, TimeZone, Utc};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use crate::error::{CredentialError, Result};
use crate::extension::{self, CHANNEL_GRANT_OID_STR};
use crate::types::ChannelGrant;

/// Verifies leaf certificates against a single trusted root
#[derive(Debug, Clone)]
pub struct CertificateVerifier {
    root_der: Vec<u8>,
}

impl CertificateVerifier {
    /// Trust the PEM-encoded root certificate `root_pem`
    pub fn from_pem(root_pem: &str) -> Result<Self> {
        let der = decode_pem(root_pem)?;
        // Reject a root that cannot be parsed up front.
        X509Certificate::from_der(&der)
            .map_err(|e| CredentialError::MalformedCertificate(format!("root: {e}")))?;
        Ok(Self { root_der: der })
    }

    /// Verify a PEM-encoded leaf and return its grant
    pub fn verify(&self, pem: &str) -> Result<ChannelGrant> {
        self.verify_der_at(&decode_pem(pem)?, Utc::now())
    }

    /// Verify a DER-encoded leaf and return its grant
    pub fn verify_der(&self, der: &[u8]) -> Result<ChannelGrant> {
        self.verify_der_at(der, Utc::now())
    }

    /// Verify a DER-encoded leaf as of `now`
    pub fn verify_der_at(&self, der: &[u8], now: DateTime<Utc>) -> Result<ChannelGrant> {
        let (_, root) = X509Certificate::from_der(&self.root_der)
            .map_err(|e| CredentialError::MalformedCertificate(format!("root: {e}")))?;
        let (_, leaf) = X509Certificate::from_der(der)
            .map_err(|e| CredentialError::MalformedCertificate(e.to_string()))?;

        if leaf.issuer().as_raw() != root.subject().as_raw() {
            return Err(CredentialError::Untrusted(format!(
                "issued by {}, expected {}",
                leaf.issuer(),
                root.subject()
            )));
        }

        leaf.verify_signature(Some(root.public_key()))
            .map_err(|e| CredentialError::Untrusted(format!("signature: {e}")))?;

        let validity = leaf.validity();
        let now_ts = now.timestamp();
        if now_ts < validity.not_before.timestamp() {
            return Err(CredentialError::NotYetValid(render(validity.not_before.timestamp())));
        }
        if now_ts > validity.not_after.timestamp() {
            return Err(CredentialError::Expired(render(validity.not_after.timestamp())));
        }

        extension::decode(leaf.extensions().iter(), CHANNEL_GRANT_OID_STR)
    }
}

fn decode_pem(pem: &str) -> Result<Vec<u8>> {
    let (_, pem) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| CredentialError::MalformedCertificate(format!("pem: {e}")))?;
    if pem.label != "CERTIFICATE" {
        return Err(CredentialError::MalformedCertificate(format!(
            "unexpected pem label {}",
            pem.label
        )));
    }
    Ok(pem.contents)
}

fn render(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
