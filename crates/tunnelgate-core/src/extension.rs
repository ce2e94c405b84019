//! Private X.509 extensions
//!
//! Both payloads are compact JSON placed directly in the extension value.

use serde::{de::DeserializeOwned, Serialize};
use x509_parser::extensions::X509Extension;

use crate::error::{CredentialError, Result};

/// Arc of the request-claims extension
pub const REQUEST_CLAIMS_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 12345, 1];

/// Arc of the channel-grant extension
pub const CHANNEL_GRANT_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 12345, 2];

/// Dotted form of [`REQUEST_CLAIMS_OID`]
pub const REQUEST_CLAIMS_OID_STR: &str = "1.3.6.1.4.1.12345.1";

/// Dotted form of [`CHANNEL_GRANT_OID`]
pub const CHANNEL_GRANT_OID_STR: &str = "1.3.6.1.4.1.12345.2";

/// Build a non-critical rcgen extension carrying `payload`
pub fn encode<T: Serialize>(oid: &[u64], payload: &T) -> Result<rcgen::CustomExtension> {
    let content = serde_json::to_vec(payload)?;
    Ok(rcgen::CustomExtension::from_oid_content(oid, content))
}

/// Find the extension with dotted id `oid` and decode its payload
pub fn decode<'a, 'b, T, I>(extensions: I, oid: &'static str) -> Result<T>
where
    'a: 'b,
    T: DeserializeOwned,
    I: IntoIterator<Item = &'b X509Extension<'a>>,
{
    let ext = extensions
        .into_iter()
        .find(|ext| ext.oid.to_id_string() == oid)
        .ok_or(CredentialError::MissingExtension(oid))?;

    serde_json::from_slice(ext.value).map_err(|e| CredentialError::InvalidExtension(e.to_string()))
}
