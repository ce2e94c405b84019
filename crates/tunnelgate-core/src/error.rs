//! Error types for the credential protocol

use thiserror::Error;

/// Result type alias using CredentialError
pub type Result<T> = std::result::Result<T, CredentialError>;

/// Errors raised while building, issuing or verifying credentials
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Machine identity was blank
    #[error("machine identity is empty")]
    EmptyIdentity,

    /// CSR could not be decoded, or its self-signature does not check out
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Certificate PEM or DER could not be decoded
    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    /// Certificate does not chain to the trusted root
    #[error("untrusted certificate: {0}")]
    Untrusted(String),

    /// Certificate validity window has elapsed
    #[error("certificate expired at {0}")]
    Expired(String),

    /// Certificate validity window has not started
    #[error("certificate not valid until {0}")]
    NotYetValid(String),

    /// Private extension absent from a request or certificate
    #[error("missing extension {0}")]
    MissingExtension(&'static str),

    /// Private extension present but its payload does not decode
    #[error("invalid extension payload: {0}")]
    InvalidExtension(String),

    /// Key generation or signing failed
    #[error("signing error: {0}")]
    Signing(String),

    /// Machine identity could not be derived
    #[error("identity error: {0}")]
    Identity(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CredentialError {
    /// Cryptographically invalid, as opposed to structurally broken
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self,
            CredentialError::Untrusted(_)
                | CredentialError::Expired(_)
                | CredentialError::NotYetValid(_)
        )
    }

    /// Input could not be decoded or lacks the expected structure
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            CredentialError::MalformedRequest(_)
                | CredentialError::MalformedCertificate(_)
                | CredentialError::MissingExtension(_)
                | CredentialError::InvalidExtension(_)
                | CredentialError::EmptyIdentity
        )
    }
}

impl From<rcgen::Error> for CredentialError {
    fn from(err: rcgen::Error) -> Self {
        CredentialError::Signing(err.to_string())
    }
}

impl From<serde_json::Error> for CredentialError {
    fn from(err: serde_json::Error) -> Self {
        CredentialError::InvalidExtension(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes_are_disjoint() {
        let trust = [
            CredentialError::Untrusted("sig".into()),
            CredentialError::Expired("then".into()),
            CredentialError::NotYetValid("later".into()),
        ];
        for err in &trust {
            assert!(err.is_trust_failure());
            assert!(!err.is_malformed());
        }

        let malformed = [
            CredentialError::MalformedCertificate("pem".into()),
            CredentialError::MissingExtension("1.2.3"),
            CredentialError::InvalidExtension("json".into()),
        ];
        for err in &malformed {
            assert!(err.is_malformed());
            assert!(!err.is_trust_failure());
        }
    }
}
