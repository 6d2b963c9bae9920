//! In-memory shard cache.
//!
//! Holds the latest known map of every recently used shard. Dirty entries
//! are the newest state of their shard and always win over disk; clean
//! entries are only trusted while their identity token matches the index.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::ShardMap;
use crate::metrics::{CACHE_ENTRIES, CACHE_EVICTIONS};

#[derive(Debug, Clone)]
struct CachedShard {
    records: Arc<ShardMap>,
    /// Identity token of the disk state this entry was loaded from or last
    /// flushed as; 0 if it never touched disk.
    file_time: i64,
    dirty: bool,
    /// Bumped on every publish, so a flush can tell whether it wrote the
    /// latest state.
    version: u64,
    last_access: Instant,
}

/// A dirty shard captured for flushing.
#[derive(Debug, Clone)]
pub(crate) struct DirtyShard {
    pub key: String,
    pub records: Arc<ShardMap>,
    pub version: u64,
}

/// What a finished write means for the cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushMark {
    Clean,
    Superseded,
    Gone,
}

#[derive(Debug)]
pub(crate) struct ShardCache {
    enabled: bool,
    entries: Mutex<HashMap<String, CachedShard>>,
}

impl ShardCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached map for `key` if it can be trusted against `index_time`.
    /// A clean entry that no longer matches is dropped.
    pub fn get_fresh(&self, key: &str, index_time: Option<i64>) -> Option<Arc<ShardMap>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        if entry.dirty || Some(entry.file_time) == index_time {
            entry.last_access = Instant::now();
            return Some(entry.records.clone());
        }
        entries.remove(key);
        CACHE_ENTRIES.set(entries.len() as i64);
        None
    }

    /// Remember a map read from disk, unless something newer is already here.
    pub fn insert_loaded(&self, key: &str, records: Arc<ShardMap>, file_time: i64) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key) {
            if existing.dirty || existing.file_time >= file_time {
                return;
            }
        }
        entries.insert(
            key.to_string(),
            CachedShard {
                records,
                file_time,
                dirty: false,
                version: 0,
                last_access: Instant::now(),
            },
        );
        CACHE_ENTRIES.set(entries.len() as i64);
    }

    /// Install the state a writer just released. Always kept, even with the
    /// cache disabled, until a flush persists it.
    pub fn publish(&self, key: &str, records: Arc<ShardMap>) {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.records = records;
                entry.dirty = true;
                entry.version += 1;
                entry.last_access = Instant::now();
            }
            None => {
                entries.insert(
                    key.to_string(),
                    CachedShard {
                        records,
                        file_time: 0,
                        dirty: true,
                        version: 1,
                        last_access: Instant::now(),
                    },
                );
            }
        }
        CACHE_ENTRIES.set(entries.len() as i64);
    }

    pub fn dirty_shards(&self) -> Vec<DirtyShard> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(k, e)| DirtyShard {
                key: k.clone(),
                records: e.records.clone(),
                version: e.version,
            })
            .collect()
    }

    /// Keys of dirty entries with whether their map is empty.
    pub fn dirty_keys(&self) -> Vec<(String, bool)> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(k, e)| (k.clone(), e.records.is_empty()))
            .collect()
    }

    /// Record that `version` of `key` reached disk as `file_time`.
    ///
    /// A newer published version stays dirty for the next flush. `Gone` means
    /// the shard was removed while the write was in flight.
    pub fn mark_flushed(&self, key: &str, version: u64, file_time: i64) -> FlushMark {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return FlushMark::Gone;
        };
        entry.file_time = file_time;
        if entry.version == version {
            entry.dirty = false;
            FlushMark::Clean
        } else {
            FlushMark::Superseded
        }
    }

    /// Drop `key` after its file was deleted, unless it was rewritten meanwhile.
    pub fn remove_flushed(&self, key: &str, version: u64) -> bool {
        let mut entries = self.entries.lock();
        let removed = match entries.get_mut(key) {
            Some(entry) if entry.version == version => true,
            Some(entry) => {
                entry.file_time = 0;
                false
            }
            None => false,
        };
        if removed {
            entries.remove(key);
        }
        CACHE_ENTRIES.set(entries.len() as i64);
        removed
    }

    /// Unconditionally forget `key`.
    pub fn remove(&self, key: &str) {
        let mut entries = self.entries.lock();
        entries.remove(key);
        CACHE_ENTRIES.set(entries.len() as i64);
    }

    /// Evict clean entries idle for longer than `ttl`, then, while above
    /// `max_entries`, up to `batch` least recently used clean entries.
    pub fn evict(&self, ttl: Duration, max_entries: usize, batch: usize) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let now = Instant::now();

        entries.retain(|_, e| e.dirty || now.duration_since(e.last_access) < ttl);

        if entries.len() > max_entries {
            let mut clean: Vec<(String, Instant)> = entries
                .iter()
                .filter(|(_, e)| !e.dirty)
                .map(|(k, e)| (k.clone(), e.last_access))
                .collect();
            clean.sort_by_key(|(_, at)| *at);
            let excess = (entries.len() - max_entries).min(batch);
            for (key, _) in clean.into_iter().take(excess) {
                entries.remove(&key);
            }
        }

        let evicted = before - entries.len();
        CACHE_EVICTIONS.inc_by(evicted as u64);
        CACHE_ENTRIES.set(entries.len() as i64);
        evicted
    }

    /// Drop every clean entry (used when caching is disabled).
    pub fn drop_clean(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.dirty);
        CACHE_ENTRIES.set(entries.len() as i64);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn dirty_count(&self) -> usize {
        self.entries.lock().values().filter(|e| e.dirty).count()
    }
}
