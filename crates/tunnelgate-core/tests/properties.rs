//! Property-based tests for the credential protocol
//!
//! 1. Requests carry the machine identity through unchanged
//! 2. Certificates carry the channel grant through unchanged
//! 3. Any change to the signature is a trust failure, never a parse failure

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tunnelgate_core::{
    build_request, parse_request, CaMaterial, CertificateAuthority, ChannelGrant, CredentialError,
};
use x509_parser::pem::parse_x509_pem;

fn authority() -> CertificateAuthority {
    let material = CaMaterial::generate("property root").expect("CA generation should succeed");
    CertificateAuthority::from_material(&material).expect("CA should load")
}

fn arb_grant() -> impl Strategy<Value = ChannelGrant> {
    (
        (1i64..i64::MAX, ".{0,40}", "[a-z0-9.-]{1,30}:[0-9]{2,5}"),
        (1i64..1_000_000, "[a-zA-Z0-9-]{1,64}", 1i64..1_000_000, 1u16..=u16::MAX),
        ("[a-f0-9]{64}", 0i64..4_102_444_800),
    )
        .prop_map(
            |(
                (channel_id, description, broker_host),
                (client_id, client_key, tunnel_id, tunnel_port),
                (machine_id, expires),
            )| ChannelGrant {
                channel_id,
                description,
                broker_host,
                client_id,
                client_key,
                tunnel_id,
                tunnel_port,
                machine_id,
                expires_at: Utc.timestamp_opt(expires, 0).unwrap(),
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever identity goes into a request comes back out
    #[test]
    fn prop_request_round_trip(identity in "[A-Za-z0-9:_-]{1,128}") {
        let pem = build_request(&identity).expect("request should build");
        let claims = parse_request(&pem).expect("request should parse");
        prop_assert_eq!(claims.machine_id, identity);
    }

    /// Whatever grant goes into a certificate comes back out
    #[test]
    fn prop_certificate_round_trip(grant in arb_grant()) {
        let ca = authority();
        let pem = ca.issue(&grant).expect("issuance should succeed");
        let verified = ca.verifier().verify(&pem).expect("fresh certificate should verify");
        prop_assert_eq!(verified, grant);
    }

    /// Flipping any bit of any byte in the signature region breaks trust
    #[test]
    fn prop_signature_tamper_is_trust_failure(
        grant in arb_grant(),
        offset in 1usize..=32,
        mask in 1u8..=255,
    ) {
        let ca = authority();
        let pem = ca.issue(&grant).expect("issuance should succeed");
        let (_, parsed) = parse_x509_pem(pem.as_bytes()).expect("issued PEM should decode");

        // The signature BIT STRING is the last element of the DER, and an
        // ECDSA signature is longer than 32 bytes.
        let mut der = parsed.contents;
        let index = der.len() - offset;
        der[index] ^= mask;

        let err = ca.verifier().verify_der(&der).expect_err("tampered certificate must not verify");
        prop_assert!(err.is_trust_failure(), "expected trust failure, got {err:?}");
        prop_assert!(matches!(err, CredentialError::Untrusted(_)));
    }
}
