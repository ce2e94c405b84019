//! Storage abstraction for channel records
//!
//! This module provides a trait-based abstraction for the channel table,
//! with an in-memory backend (default) and a SQLite backend behind the
//! `sqlite` feature.
//!
//! Records are never removed. Revocation stamps `deleted_at`, and every read
//! path only sees records without it.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use tunnelgate_core::ChannelGrant;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Fields supplied when creating a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub description: String,
    pub broker_host: String,
    pub client_id: i64,
    pub client_key: String,
    pub tunnel_id: i64,
    pub tunnel_port: u16,
    pub machine_id: String,
    pub expires_at: DateTime<Utc>,
}

/// A persisted channel grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    /// Assigned by the store
    pub channel_id: i64,
    pub description: String,
    pub broker_host: String,
    pub client_id: i64,
    pub client_key: String,
    pub tunnel_id: i64,
    pub tunnel_port: u16,
    pub machine_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the record was superseded or revoked
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ChannelRecord {
    /// Build the stored form of `new` under `channel_id`
    pub fn from_new(channel_id: i64, new: NewChannel, now: DateTime<Utc>) -> Self {
        Self {
            channel_id,
            description: new.description,
            broker_host: new.broker_host,
            client_id: new.client_id,
            client_key: new.client_key,
            tunnel_id: new.tunnel_id,
            tunnel_port: new.tunnel_port,
            machine_id: new.machine_id,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Snapshot embedded in the issued certificate
    pub fn to_grant(&self) -> ChannelGrant {
        ChannelGrant {
            channel_id: self.channel_id,
            description: self.description.clone(),
            broker_host: self.broker_host.clone(),
            client_id: self.client_id,
            client_key: self.client_key.clone(),
            tunnel_id: self.tunnel_id,
            tunnel_port: self.tunnel_port,
            machine_id: self.machine_id.clone(),
            expires_at: self.expires_at,
        }
    }

    /// Not soft-deleted
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Storage backend trait for channel records
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait ChannelStore: Send + Sync + Debug {
    /// Persist a new channel and return it with its assigned id
    async fn insert(&self, channel: NewChannel) -> Result<ChannelRecord, StorageError>;

    /// Get an active channel by id
    async fn get(&self, channel_id: i64) -> Result<Option<ChannelRecord>, StorageError>;

    /// List the active channels owned by a machine, oldest first
    async fn list_active_by_machine(&self, machine_id: &str) -> Result<Vec<ChannelRecord>, StorageError>;

    /// Soft-delete channels, returning how many were active
    ///
    /// Ids that are unknown or already deleted are skipped.
    async fn soft_delete(&self, channel_ids: &[i64]) -> Result<usize, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_excludes_store_timestamps() {
        let now = Utc::now();
        let record = ChannelRecord::from_new(
            5,
            NewChannel {
                description: "d".into(),
                broker_host: "h:1".into(),
                client_id: 1,
                client_key: "k".into(),
                tunnel_id: 2,
                tunnel_port: 3,
                machine_id: "m".into(),
                expires_at: now,
            },
            now,
        );

        let grant = record.to_grant();
        assert_eq!(grant.channel_id, 5);
        assert_eq!(grant.tunnel_port, 3);
        assert_eq!(grant.expires_at, now);
        assert!(record.is_active());
    }
}
