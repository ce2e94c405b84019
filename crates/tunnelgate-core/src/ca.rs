//! Certificate authority
//!
//! Signs leaf certificates that carry a [`ChannelGrant`]. The CA itself keeps
//! no per-issuance state; the channel store is the record of what was issued.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SerialNumber,
};
use std::fmt;
use std::fs;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::csr::{subject, SUBJECT_ORGANIZATION};
use crate::error::Result;
use crate::extension::{self, CHANNEL_GRANT_OID};
use crate::types::ChannelGrant;
use crate::verify::CertificateVerifier;

/// Lifetime of an issued leaf certificate
pub const LEAF_VALIDITY: Duration = Duration::days(365);

/// Lifetime of a bootstrapped root
const ROOT_VALIDITY: Duration = Duration::days(3650);

/// PEM-encoded root certificate and its private key
#[derive(Clone)]
pub struct CaMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

impl fmt::Debug for CaMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaMaterial")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl CaMaterial {
    /// Generate a fresh self-signed root
    pub fn generate(common_name: &str) -> Result<Self> {
        let key = KeyPair::generate()?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, SUBJECT_ORGANIZATION);
        dn.push(DnType::CommonName, common_name);

        let now = OffsetDateTime::now_utc();
        let mut params = CertificateParams::default();
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = now - Duration::days(1);
        params.not_after = now + ROOT_VALIDITY;

        let cert = params.self_signed(&key)?;
        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    /// Read a root certificate and key from PEM files
    pub fn load(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            cert_pem: fs::read_to_string(cert_path)?,
            key_pem: fs::read_to_string(key_path)?,
        })
    }

    /// Write the root certificate and key as PEM files
    pub fn save(&self, cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<()> {
        fs::write(cert_path, &self.cert_pem)?;
        fs::write(key_path, &self.key_pem)?;
        Ok(())
    }
}

/// Signing half of the CA
pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    cert_pem: String,
    verifier: CertificateVerifier,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Load the CA from its PEM-encoded certificate and key
    pub fn from_material(material: &CaMaterial) -> Result<Self> {
        let key = KeyPair::from_pem(&material.key_pem)?;
        let issuer = Issuer::from_ca_cert_pem(&material.cert_pem, key)?;
        let verifier = CertificateVerifier::from_pem(&material.cert_pem)?;

        Ok(Self {
            issuer,
            cert_pem: material.cert_pem.clone(),
            verifier,
        })
    }

    /// Root certificate PEM, as distributed to agents
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Verifier trusting this CA
    pub fn verifier(&self) -> &CertificateVerifier {
        &self.verifier
    }

    /// Issue a leaf certificate for `grant`, valid for one year from now
    pub fn issue(&self, grant: &ChannelGrant) -> Result<String> {
        let now = OffsetDateTime::now_utc();
        self.issue_with_validity(grant, now, now + LEAF_VALIDITY)
    }

    /// Issue a leaf certificate for `grant` with an explicit validity window
    pub fn issue_with_validity(
        &self,
        grant: &ChannelGrant,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Result<String> {
        let key = KeyPair::generate()?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject();
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(random_serial());
        params.not_before = not_before;
        params.not_after = not_after;
        params
            .custom_extensions
            .push(extension::encode(CHANNEL_GRANT_OID, grant)?);

        let cert = params.signed_by(&key, &self.issuer)?;

        info!(
            channel_id = grant.channel_id,
            machine_id = %grant.machine_id,
            not_after = %not_after,
            "Issued channel certificate"
        );

        Ok(cert.pem())
    }
}

fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::random();
    // Keep the DER integer positive and non-zero.
    bytes[0] = (bytes[0] & 0x7f) | 0x01;
    SerialNumber::from_slice(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::pem::parse_x509_pem;
    use x509_parser::prelude::*;

    fn grant() -> ChannelGrant {
        ChannelGrant {
            channel_id: 1,
            description: "bench".into(),
            broker_host: "127.0.0.1:8024".into(),
            client_id: 2,
            client_key: "m-1".into(),
            tunnel_id: 3,
            tunnel_port: 40000,
            machine_id: "m".into(),
            expires_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_material_round_trips_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let material = CaMaterial::generate("test root").unwrap();
        let cert = dir.path().join("ca.pem");
        let key = dir.path().join("ca.key");
        material.save(&cert, &key).unwrap();

        let loaded = CaMaterial::load(&cert, &key).unwrap();
        assert_eq!(loaded.cert_pem, material.cert_pem);
        assert!(CertificateAuthority::from_material(&loaded).is_ok());
    }

    #[test]
    fn test_leaf_profile() {
        let ca = CertificateAuthority::from_material(&CaMaterial::generate("root").unwrap()).unwrap();
        let pem = ca.issue(&grant()).unwrap();

        let (_, pem) = parse_x509_pem(pem.as_bytes()).unwrap();
        let (_, cert) = X509Certificate::from_der(&pem.contents).unwrap();

        assert!(!cert.is_ca());
        let validity = cert.validity();
        let span = validity.not_after.timestamp() - validity.not_before.timestamp();
        assert_eq!(span, LEAF_VALIDITY.whole_seconds());

        let ku = cert.key_usage().unwrap().unwrap().value;
        assert!(ku.digital_signature());
        assert!(ku.key_encipherment());
        assert!(!ku.key_cert_sign());

        let eku = cert.extended_key_usage().unwrap().unwrap().value;
        assert!(eku.server_auth);
    }

    #[test]
    fn test_serials_differ() {
        let ca = CertificateAuthority::from_material(&CaMaterial::generate("root").unwrap()).unwrap();
        let a = ca.issue(&grant()).unwrap();
        let b = ca.issue(&grant()).unwrap();

        let serial = |pem: &str| {
            let (_, pem) = parse_x509_pem(pem.as_bytes()).unwrap();
            let (_, cert) = X509Certificate::from_der(&pem.contents).unwrap();
            cert.raw_serial().to_vec()
        };
        assert_ne!(serial(&a), serial(&b));
    }

    #[test]
    fn test_debug_redacts_key() {
        let material = CaMaterial::generate("root").unwrap();
        let shown = format!("{material:?}");
        assert!(shown.contains("<redacted>"));
        assert!(!shown.contains("PRIVATE KEY"));
    }
}
