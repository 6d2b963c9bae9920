//! File-backed bucket store.
//!
//! One file per shard key, a master index of what exists on disk, and a
//! write-through cache in front of it. Writers serialize per shard; nothing
//! serializes the store as a whole.

mod cache;
mod error;
mod guard;
mod index;
pub mod layout;

pub use error::StoreError;
pub use guard::ShardWriteGuard;
pub use index::{IndexEntry, MasterIndex};
pub use layout::ShardLayout;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::ingest_log::IngestLogHandle;
use crate::key::{bucket_key, is_valid_key};
use crate::metrics::{CORRUPT_SHARDS, SHARD_FLUSHES, SHARD_READS};
use crate::normalize::Normalizer;
use crate::record::TorrentRecord;
use cache::{FlushMark, ShardCache};
use layout::{ShardHeader, SHARD_FORMAT_VERSION};

/// Contents of one shard: record url -> record.
pub type ShardMap = BTreeMap<String, TorrentRecord>;

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    pub written: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Point-in-time store counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub shards: usize,
    pub cached: usize,
    pub dirty: usize,
}

enum Persisted {
    Written(IndexEntry),
    Removed,
}

/// The bucket store. Share it behind an `Arc`.
pub struct BucketStore {
    config: StoreConfig,
    normalizer: Normalizer,
    layout: ShardLayout,
    index: MasterIndex,
    cache: Arc<ShardCache>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    flush_lock: AsyncMutex<()>,
    flush_notify: Arc<Notify>,
    clock: AtomicI64,
    ingest_log: Option<IngestLogHandle>,
}

impl BucketStore {
    /// Open the store rooted at `config.path`, creating it if needed, and
    /// rebuild the master index from the shard files found there.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&config.path)
            .await
            .map_err(|e| StoreError::io(&config.path, e))?;

        let layout = ShardLayout::new(&config.path, config.path_levels);
        let index = MasterIndex::load(&layout, config.io_timeout()).await?;
        info!(
            path = %config.path.display(),
            shards = index.len(),
            "Opened bucket store"
        );

        Ok(Self {
            normalizer: Normalizer::from_config(&config.normalize),
            clock: AtomicI64::new(index.max_file_time()),
            cache: Arc::new(ShardCache::new(config.cache.enabled)),
            locks: Mutex::new(HashMap::new()),
            flush_lock: AsyncMutex::new(()),
            flush_notify: Arc::new(Notify::new()),
            ingest_log: None,
            layout,
            index,
            config,
        })
    }

    /// Attach an ingest log; every add/update applied by the merge engine
    /// is reported to it.
    pub fn with_ingest_log(mut self, handle: IngestLogHandle) -> Self {
        self.ingest_log = Some(handle);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    pub fn index(&self) -> &MasterIndex {
        &self.index
    }

    pub(crate) fn ingest_log(&self) -> Option<&IngestLogHandle> {
        self.ingest_log.as_ref()
    }

    /// Woken whenever a writer releases a dirty shard.
    pub fn flush_notify(&self) -> Arc<Notify> {
        self.flush_notify.clone()
    }

    /// Shard key for a release under this store's normalizer.
    pub fn bucket_key(&self, name: &str, originalname: &str) -> Option<String> {
        bucket_key(&self.normalizer, name, originalname)
    }

    /// Current map of `key`. Missing shards read as empty.
    pub async fn open_read(&self, key: &str) -> Result<Arc<ShardMap>, StoreError> {
        self.read(key, true).await
    }

    /// Like [`open_read`](Self::open_read) but never fills the cache. Meant
    /// for whole-store scans that would otherwise flush the hot set.
    pub async fn read_uncached(&self, key: &str) -> Result<Arc<ShardMap>, StoreError> {
        self.read(key, false).await
    }

    async fn read(&self, key: &str, populate: bool) -> Result<Arc<ShardMap>, StoreError> {
        if !is_valid_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        let entry = self.index.get(key);
        if let Some(records) = self.cache.get_fresh(key, entry.map(|e| e.file_time)) {
            SHARD_READS.with_label_values(&["cache"]).inc();
            return Ok(records);
        }

        let Some(entry) = entry else {
            SHARD_READS.with_label_values(&["empty"]).inc();
            return Ok(Arc::new(ShardMap::new()));
        };

        let (records, file_time) = self.load_from_disk(key, &entry).await?;
        SHARD_READS.with_label_values(&["disk"]).inc();
        if populate {
            self.cache.insert_loaded(key, records.clone(), file_time);
        }
        Ok(records)
    }

    /// Load one shard file. Corrupt or oversized files read as empty;
    /// unreadable entries inside an otherwise valid file are skipped.
    async fn load_from_disk(
        &self,
        key: &str,
        entry: &IndexEntry,
    ) -> Result<(Arc<ShardMap>, i64), StoreError> {
        let path = self.layout.path_for(key);
        let io_timeout = self.config.io_timeout();

        let max_bytes = self.config.max_read_bytes();
        if max_bytes > 0 && entry.size > max_bytes {
            warn!(
                path = %path.display(),
                size = entry.size,
                max = max_bytes,
                "Shard file exceeds max read size, treating as empty"
            );
            CORRUPT_SHARDS.inc();
            return Ok((Arc::new(ShardMap::new()), entry.file_time));
        }

        let bytes = match tokio::time::timeout(io_timeout, tokio::fs::read(&path)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(key = %key, path = %path.display(), "Indexed shard file is missing");
                return Ok((Arc::new(ShardMap::new()), entry.file_time));
            }
            Ok(Err(e)) => return Err(StoreError::io(&path, e)),
            Err(_) => return Err(StoreError::IoTimeout { path }),
        };

        match layout::decode_shard(&bytes) {
            Ok(decoded) if decoded.header.key == key => {
                if !decoded.dropped.is_empty() {
                    warn!(
                        path = %path.display(),
                        key = %key,
                        dropped = decoded.dropped.len(),
                        kept = decoded.records.len(),
                        "Dropped unreadable records from shard"
                    );
                    CORRUPT_SHARDS.inc();
                }
                Ok((Arc::new(decoded.records), decoded.header.file_time))
            }
            Ok(decoded) => {
                warn!(
                    path = %path.display(),
                    expected = %key,
                    found = %decoded.header.key,
                    "Shard file holds a different key, treating as empty"
                );
                CORRUPT_SHARDS.inc();
                Ok((Arc::new(ShardMap::new()), entry.file_time))
            }
            Err(reason) => {
                warn!(
                    path = %path.display(),
                    reason = %reason,
                    "Corrupt shard file, treating as empty"
                );
                CORRUPT_SHARDS.inc();
                Ok((Arc::new(ShardMap::new()), entry.file_time))
            }
        }
    }

    async fn acquire_lock(&self, key: &str) -> Result<OwnedMutexGuard<()>, StoreError> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        tokio::time::timeout(self.config.write_lock_timeout(), lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout {
                key: key.to_string(),
            })
    }

    /// Exclusive write access to `key`. Waits up to the configured lock
    /// timeout while another writer holds the shard.
    pub async fn open_write(&self, key: &str) -> Result<ShardWriteGuard, StoreError> {
        if !is_valid_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let lock = self.acquire_lock(key).await?;
        let current = self.read(key, true).await?;
        Ok(ShardWriteGuard::new(
            key.to_string(),
            ShardMap::clone(&current),
            self.cache.clone(),
            self.flush_notify.clone(),
            lock,
        ))
    }

    /// Every shard key that has records on disk or pending in memory.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = self.index.keys().into_iter().collect();
        for (key, empty) in self.cache.dirty_keys() {
            if empty {
                keys.remove(&key);
            } else {
                keys.insert(key);
            }
        }
        keys.into_iter().collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys().binary_search_by(|k| k.as_str().cmp(key)).is_ok()
    }

    /// Persisted shards after the `(since, after_key)` cursor, oldest first.
    /// See [`MasterIndex::changed_since`].
    pub fn changed_since(
        &self,
        since: DateTime<Utc>,
        after_key: Option<&str>,
        limit: usize,
    ) -> Vec<(String, IndexEntry)> {
        self.index.changed_since(since, after_key, limit)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            shards: self.keys().len(),
            cached: self.cache.len(),
            dirty: self.cache.dirty_count(),
        }
    }

    /// Write every dirty shard to disk and refresh its index entry.
    ///
    /// Shards whose map became empty are deleted. A failing shard is logged
    /// and stays dirty for the next pass; the rest of the pass goes on.
    pub async fn flush(&self) -> FlushStats {
        let _pass = self.flush_lock.lock().await;
        let mut stats = FlushStats::default();

        for shard in self.cache.dirty_shards() {
            match self.persist(&shard.key, &shard.records).await {
                Ok(Persisted::Written(entry)) => {
                    match self
                        .cache
                        .mark_flushed(&shard.key, shard.version, entry.file_time)
                    {
                        FlushMark::Clean | FlushMark::Superseded => {
                            self.index.insert(shard.key.clone(), entry);
                            SHARD_FLUSHES.with_label_values(&["ok"]).inc();
                            stats.written += 1;
                        }
                        FlushMark::Gone => {
                            // removed while the write was in flight
                            self.discard_written(&shard.key).await;
                            stats.removed += 1;
                        }
                    }
                }
                Ok(Persisted::Removed) => {
                    self.index.remove(&shard.key);
                    self.cache.remove_flushed(&shard.key, shard.version);
                    SHARD_FLUSHES.with_label_values(&["removed"]).inc();
                    stats.removed += 1;
                }
                Err(e) => {
                    error!(key = %shard.key, error = %e, "Failed to flush shard");
                    SHARD_FLUSHES.with_label_values(&["error"]).inc();
                    stats.failed += 1;
                }
            }
        }

        if !self.config.cache.enabled {
            self.cache.drop_clean();
        }

        if stats != FlushStats::default() {
            debug!(
                written = stats.written,
                removed = stats.removed,
                failed = stats.failed,
                "Flush pass complete"
            );
        }
        stats
    }

    async fn discard_written(&self, key: &str) {
        let path = self.layout.path_for(key);
        let removed =
            tokio::time::timeout(self.config.io_timeout(), layout::remove_file(&path)).await;
        match removed {
            Ok(Ok(_)) => SHARD_FLUSHES.with_label_values(&["removed"]).inc(),
            Ok(Err(e)) => {
                error!(key = %key, error = %e, "Failed to delete shard removed during flush");
                SHARD_FLUSHES.with_label_values(&["error"]).inc();
            }
            Err(_) => {
                error!(key = %key, path = %path.display(), "Timed out deleting shard removed during flush");
                SHARD_FLUSHES.with_label_values(&["error"]).inc();
            }
        }
        self.index.remove(key);
    }

    async fn persist(&self, key: &str, records: &ShardMap) -> Result<Persisted, StoreError> {
        let path = self.layout.path_for(key);
        let io_timeout = self.config.io_timeout();

        if records.is_empty() {
            tokio::time::timeout(io_timeout, layout::remove_file(&path))
                .await
                .map_err(|_| StoreError::IoTimeout { path: path.clone() })??;
            return Ok(Persisted::Removed);
        }

        let header = ShardHeader {
            key: key.to_string(),
            version: SHARD_FORMAT_VERSION,
            file_time: self.next_file_time(),
            updated_at: Utc::now(),
        };
        let bytes = layout::encode_shard(&header, records)?;
        tokio::time::timeout(io_timeout, layout::write_atomic(&path, &bytes))
            .await
            .map_err(|_| StoreError::IoTimeout { path: path.clone() })??;

        Ok(Persisted::Written(IndexEntry {
            file_time: header.file_time,
            updated_at: header.updated_at,
            size: bytes.len() as u64,
        }))
    }

    /// Strictly increasing identity token, close to wall-clock nanoseconds.
    fn next_file_time(&self) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut prev = self.clock.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev.saturating_add(1));
            match self
                .clock
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Delete `key` if it holds no records.
    ///
    /// Returns whether anything was removed. Fails with `NotEmpty` when
    /// records are present.
    pub async fn remove_empty_shard(&self, key: &str) -> Result<bool, StoreError> {
        if !is_valid_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        // shard lock first, then the flush pass; flush never takes shard locks
        let _lock = self.acquire_lock(key).await?;
        let _pass = self.flush_lock.lock().await;
        let current = self.read(key, false).await?;
        if !current.is_empty() {
            return Err(StoreError::NotEmpty(key.to_string()));
        }

        let path = self.layout.path_for(key);
        let deleted = tokio::time::timeout(self.config.io_timeout(), layout::remove_file(&path))
            .await
            .map_err(|_| StoreError::IoTimeout { path: path.clone() })??;
        let indexed = self.index.remove(key).is_some();
        self.cache.remove(key);
        Ok(deleted || indexed)
    }

    /// Remove every indexed shard whose map is empty. Returns the count.
    pub async fn remove_empty_shards(&self) -> usize {
        let mut removed = 0;
        for key in self.index.keys() {
            match self.read_uncached(&key).await {
                Ok(records) if records.is_empty() => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read shard during cleanup");
                    continue;
                }
            }
            match self.remove_empty_shard(&key).await {
                Ok(true) => removed += 1,
                Ok(false) | Err(StoreError::NotEmpty(_)) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to remove empty shard"),
            }
        }
        if removed > 0 {
            info!(removed, "Removed empty shards");
        }
        removed
    }

    /// Evict idle clean shards according to the cache policy.
    pub fn evict_cache(&self) -> usize {
        let cache = &self.config.cache;
        self.cache
            .evict(cache.ttl(), cache.max_entries, cache.evict_batch)
    }

    /// Drop lock slots no writer is holding or waiting on.
    pub fn prune_locks(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    /// Re-read the shard headers on disk and replace the master index.
    ///
    /// Picks up files written by another process; cached copies that no
    /// longer match are dropped on their next read.
    pub async fn rescan_index(&self) -> Result<usize, StoreError> {
        let fresh = MasterIndex::load(&self.layout, self.config.io_timeout()).await?;
        let count = fresh.len();
        self.clock.fetch_max(fresh.max_file_time(), Ordering::AcqRel);
        self.index.replace_with(fresh);
        info!(shards = count, "Rescanned master index");
        Ok(count)
    }
}

impl std::fmt::Debug for BucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketStore")
            .field("path", &self.config.path)
            .field("shards", &self.index.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}
