//! Bounded channel → port cache
//!
//! Entries are never authoritative; a miss goes to the channel store once
//! and the answer is cached. Revocation removes entries explicitly.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::storage::{ChannelStore, StorageError};

/// Default number of cached routes
pub const DEFAULT_CAPACITY: usize = 2000;

#[derive(Debug)]
struct Entries {
    routes: LruCache<i64, u16>,
    /// Bumped on every invalidation
    epoch: u64,
}

/// Least-recently-used cache of channel routes, backed by the channel store
#[derive(Debug)]
pub struct RouteCache {
    entries: Mutex<Entries>,
    store: Arc<dyn ChannelStore>,
}

impl RouteCache {
    /// Create a cache holding at most `capacity` routes (minimum one)
    pub fn new(store: Arc<dyn ChannelStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(Entries {
                routes: LruCache::new(capacity),
                epoch: 0,
            }),
            store,
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Backend port for `channel_id`, or `None` if no active channel has it
    ///
    /// A lookup that overlaps an invalidation answers from the store but does
    /// not populate the cache.
    pub async fn resolve(&self, channel_id: i64) -> Result<Option<u16>, StorageError> {
        let epoch = {
            let mut entries = self.entries();
            if let Some(port) = entries.routes.get(&channel_id).copied() {
                return Ok(Some(port));
            }
            entries.epoch
        };

        let Some(record) = self.store.get(channel_id).await? else {
            debug!(channel_id = channel_id, "No route for channel");
            return Ok(None);
        };

        let mut entries = self.entries();
        if entries.epoch == epoch {
            entries.routes.put(channel_id, record.tunnel_port);
            debug!(channel_id = channel_id, port = record.tunnel_port, "Cached route");
        } else {
            debug!(channel_id = channel_id, "Routes invalidated during lookup, not caching");
        }
        Ok(Some(record.tunnel_port))
    }

    /// Drop the route for `channel_id`, returning whether one was cached
    pub fn invalidate(&self, channel_id: i64) -> bool {
        let mut entries = self.entries();
        entries.epoch += 1;
        entries.routes.pop(&channel_id).is_some()
    }

    /// Whether a route is cached, without touching recency
    pub fn contains(&self, channel_id: i64) -> bool {
        self.entries().routes.contains(&channel_id)
    }

    /// Number of cached routes
    pub fn len(&self) -> usize {
        self.entries().routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().routes.is_empty()
    }
}
