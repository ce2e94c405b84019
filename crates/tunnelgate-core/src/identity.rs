//! Machine identity
//!
//! The identity is derived once from hardware addresses and then cached in a
//! file so it survives interface changes.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{CredentialError, Result};

const SYS_NET: &str = "/sys/class/net";
const MACHINE_ID_FILE: &str = "/etc/machine-id";
const HOSTNAME_FILE: &str = "/etc/hostname";

/// Stable fingerprint of a host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineIdentity(String);

impl MachineIdentity {
    /// Wrap an existing fingerprint, rejecting blank values
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CredentialError::EmptyIdentity);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Read the cached identity at `path`, deriving and writing it if absent
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let cached = fs::read_to_string(path)?;
            if let Ok(identity) = Self::new(cached) {
                debug!(path = %path.display(), "Loaded cached machine identity");
                return Ok(identity);
            }
        }

        let identity = Self::derive()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, identity.as_str())?;
        info!(path = %path.display(), machine_id = %identity, "Derived machine identity");
        Ok(identity)
    }

    /// Derive a fingerprint from this host
    ///
    /// Hashes the non-zero hardware addresses of all network interfaces,
    /// falling back to the OS machine id and then the hostname.
    pub fn derive() -> Result<Self> {
        let source = hardware_addresses()
            .filter(|addrs| !addrs.is_empty())
            .map(|addrs| addrs.join("-"))
            .or_else(|| read_trimmed(MACHINE_ID_FILE))
            .or_else(|| read_trimmed(HOSTNAME_FILE))
            .ok_or_else(|| CredentialError::Identity("no host fingerprint source".into()))?;

        Ok(Self(fingerprint(&source)))
    }

    /// Borrow the fingerprint
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex SHA-256 of `source`
pub fn fingerprint(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

fn hardware_addresses() -> Option<Vec<String>> {
    let entries = fs::read_dir(SYS_NET).ok()?;
    let mut addrs: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| read_trimmed(entry.path().join("address")))
        .filter(|addr| addr.chars().any(|c| c != '0' && c != ':'))
        .collect();
    addrs.sort();
    addrs.dedup();
    Some(addrs)
}

fn read_trimmed(path: impl AsRef<Path>) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
