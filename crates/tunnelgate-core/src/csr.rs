//! Certificate signing requests
//!
//! The CSR is only a container for [`RequestClaims`]. Its key is generated
//! per request and thrown away.

use chrono::{DateTime, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use crate::error::{CredentialError, Result};
use crate::extension::{self, REQUEST_CLAIMS_OID, REQUEST_CLAIMS_OID_STR};
use crate::types::RequestClaims;

/// Organization placed in request and leaf subjects
pub const SUBJECT_ORGANIZATION: &str = "tunnelgate";

/// Common name placed in request and leaf subjects
pub const SUBJECT_COMMON_NAME: &str = "tunnelgate client";

pub(crate) fn subject() -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, SUBJECT_ORGANIZATION);
    dn.push(DnType::CommonName, SUBJECT_COMMON_NAME);
    dn
}

/// Build a PEM-encoded CSR for `machine_id`, stamped with the current time
pub fn build_request(machine_id: &str) -> Result<String> {
    build_request_at(machine_id, Utc::now())
}

/// Build a PEM-encoded CSR for `machine_id` with an explicit request time
pub fn build_request_at(machine_id: &str, requested_at: DateTime<Utc>) -> Result<String> {
    if machine_id.trim().is_empty() {
        return Err(CredentialError::EmptyIdentity);
    }

    let claims = RequestClaims {
        machine_id: machine_id.to_string(),
        requested_at,
    };

    let key = KeyPair::generate()?;
    let mut params = CertificateParams::default();
    params.distinguished_name = subject();
    params
        .custom_extensions
        .push(extension::encode(REQUEST_CLAIMS_OID, &claims)?);

    let csr = params.serialize_request(&key)?;
    Ok(csr.pem()?)
}

/// Decode a PEM-encoded CSR and return its claims
///
/// The self-signature is checked for well-formedness only; it says nothing
/// about who sent the request.
pub fn parse_request(pem: &str) -> Result<RequestClaims> {
    let (_, pem) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| CredentialError::MalformedRequest(format!("pem: {e}")))?;

    let (_, csr) = X509CertificationRequest::from_der(&pem.contents)
        .map_err(|e| CredentialError::MalformedRequest(format!("der: {e}")))?;

    csr.verify_signature()
        .map_err(|e| CredentialError::MalformedRequest(format!("self-signature: {e}")))?;

    let extensions = csr
        .certification_request_info
        .iter_attributes()
        .find_map(|attr| match attr.parsed_attribute() {
            ParsedCriAttribute::ExtensionRequest(req) => Some(&req.extensions),
            _ => None,
        })
        .ok_or_else(|| {
            CredentialError::MalformedRequest(format!("missing extension {REQUEST_CLAIMS_OID_STR}"))
        })?;

    let claims: RequestClaims = extension::decode(extensions.iter(), REQUEST_CLAIMS_OID_STR)
        .map_err(|e| CredentialError::MalformedRequest(e.to_string()))?;

    if claims.machine_id.trim().is_empty() {
        return Err(CredentialError::MalformedRequest("empty machine id".into()));
    }

    Ok(claims)
}
