//! In-memory storage backend
//!
//! Default storage implementation using an in-memory map.
//! Suitable for development and single-instance deployments.
//! Data is lost on restart.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::info;

use super::{ChannelRecord, ChannelStore, NewChannel, StorageError};

#[derive(Debug, Default)]
struct Inner {
    last_id: i64,
    channels: BTreeMap<i64, ChannelRecord>,
}

/// In-memory channel store implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a channel whether or not it is deleted
    pub fn get_any(&self, channel_id: i64) -> Option<ChannelRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.channels.get(&channel_id).cloned()
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn insert(&self, channel: NewChannel) -> Result<ChannelRecord, StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.last_id += 1;
        let record = ChannelRecord::from_new(inner.last_id, channel, Utc::now());
        info!(
            channel_id = record.channel_id,
            machine_id = %record.machine_id,
            tunnel_port = record.tunnel_port,
            "Stored channel"
        );
        inner.channels.insert(record.channel_id, record.clone());
        Ok(record)
    }

    async fn get(&self, channel_id: i64) -> Result<Option<ChannelRecord>, StorageError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .channels
            .get(&channel_id)
            .filter(|r| r.is_active())
            .cloned())
    }

    async fn list_active_by_machine(&self, machine_id: &str) -> Result<Vec<ChannelRecord>, StorageError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .channels
            .values()
            .filter(|r| r.is_active() && r.machine_id == machine_id)
            .cloned()
            .collect())
    }

    async fn soft_delete(&self, channel_ids: &[i64]) -> Result<usize, StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let mut deleted = 0;
        for id in channel_ids {
            if let Some(record) = inner.channels.get_mut(id).filter(|r| r.is_active()) {
                record.deleted_at = Some(now);
                record.updated_at = now;
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(channel_ids = ?channel_ids, deleted = deleted, "Soft-deleted channels");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn new_channel(machine_id: &str, port: u16) -> NewChannel {
        NewChannel {
            description: format!("unit on {port}"),
            broker_host: "bridge:8024".into(),
            client_id: port as i64,
            client_key: format!("{machine_id}-1"),
            tunnel_id: port as i64 + 1,
            tunnel_port: port,
            machine_id: machine_id.into(),
            expires_at: Utc::now() + Duration::days(1),
        }
    }

    #[tokio::test]
    async fn test_ids_are_assigned_in_order() {
        let store = MemoryStore::new();
        let a = store.insert(new_channel("m", 1)).await.unwrap();
        let b = store.insert(new_channel("m", 2)).await.unwrap();
        assert!(b.channel_id > a.channel_id);
        assert_eq!(store.get(a.channel_id).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn test_list_by_machine_skips_others_and_deleted() {
        let store = MemoryStore::new();
        let a = store.insert(new_channel("m", 1)).await.unwrap();
        let b = store.insert(new_channel("m", 2)).await.unwrap();
        store.insert(new_channel("other", 3)).await.unwrap();

        store.soft_delete(&[a.channel_id]).await.unwrap();

        let listed = store.list_active_by_machine("m").await.unwrap();
        assert_eq!(listed, vec![b]);
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.insert(new_channel("m", 1)).await.unwrap();

        assert_eq!(store.soft_delete(&[a.channel_id]).await.unwrap(), 1);
        assert_eq!(store.soft_delete(&[a.channel_id, 999]).await.unwrap(), 0);

        assert!(store.get(a.channel_id).await.unwrap().is_none());
        assert!(store.get_any(a.channel_id).unwrap().deleted_at.is_some());
    }
}
