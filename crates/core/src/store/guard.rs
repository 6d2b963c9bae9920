//! Exclusive write access to one shard.

use std::collections::btree_map;
use std::sync::Arc;

use tokio::sync::{Notify, OwnedMutexGuard};

use super::cache::ShardCache;
use super::ShardMap;
use crate::record::TorrentRecord;

/// Scoped write handle returned by [`BucketStore::open_write`].
///
/// Holds the shard's write lock for as long as it lives. When dropped with
/// pending changes the new map is published to the cache (so readers see it
/// at once) and the flush loop is woken; the lock is released after that.
///
/// [`BucketStore::open_write`]: super::BucketStore::open_write
pub struct ShardWriteGuard {
    key: String,
    records: ShardMap,
    dirty: bool,
    cache: Arc<ShardCache>,
    flush_notify: Arc<Notify>,
    // Dropped last, after `Drop::drop` published the map.
    _lock: OwnedMutexGuard<()>,
}

impl ShardWriteGuard {
    pub(crate) fn new(
        key: String,
        records: ShardMap,
        cache: Arc<ShardCache>,
        flush_notify: Arc<Notify>,
        lock: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            key,
            records,
            dirty: false,
            cache,
            flush_notify,
            _lock: lock,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self, url: &str) -> Option<&TorrentRecord> {
        self.records.get(url)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.records.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, TorrentRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &ShardMap {
        &self.records
    }

    /// Insert under the record's own url, replacing any previous entry.
    pub fn insert(&mut self, record: TorrentRecord) -> Option<TorrentRecord> {
        self.dirty = true;
        self.records.insert(record.url.clone(), record)
    }

    pub fn remove(&mut self, url: &str) -> Option<TorrentRecord> {
        let removed = self.records.remove(url);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Live mutable map. Marks the shard dirty.
    pub fn records_mut(&mut self) -> &mut ShardMap {
        self.dirty = true;
        &mut self.records
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Drop for ShardWriteGuard {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        let records = std::mem::take(&mut self.records);
        self.cache.publish(&self.key, Arc::new(records));
        self.flush_notify.notify_one();
    }
}

impl std::fmt::Debug for ShardWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardWriteGuard")
            .field("key", &self.key)
            .field("records", &self.records.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}
