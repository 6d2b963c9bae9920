//! Master index: shard key -> freshness metadata.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use super::layout::{self, ShardLayout};
use super::StoreError;
use crate::key::is_valid_key;
use crate::metrics::CORRUPT_SHARDS;

/// What the index knows about one persisted shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    /// Identity token of the last completed write.
    pub file_time: i64,
    pub updated_at: DateTime<Utc>,
    /// File size in bytes.
    pub size: u64,
}

/// Concurrent map of every shard that exists on disk.
///
/// Only ever updated after the corresponding disk write or delete completed.
#[derive(Debug, Default)]
pub struct MasterIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl MasterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index by reading the header line of every shard file.
    ///
    /// Files whose header cannot be read, or that sit at a path that does not
    /// match their key, are logged and left out.
    pub async fn load(layout: &ShardLayout, io_timeout: Duration) -> Result<Self, StoreError> {
        let files = layout.list_files().await?;
        let mut entries = HashMap::with_capacity(files.len());

        for path in files {
            let header = match tokio::time::timeout(io_timeout, layout::read_header(&path)).await
            {
                Ok(Ok(header)) => header,
                Ok(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable shard file");
                    CORRUPT_SHARDS.inc();
                    continue;
                }
                Err(_) => {
                    warn!(path = %path.display(), "Timed out reading shard header");
                    continue;
                }
            };

            if !is_valid_key(&header.key) || layout.path_for(&header.key) != path {
                warn!(
                    path = %path.display(),
                    key = %header.key,
                    "Shard file does not match its key, skipping"
                );
                CORRUPT_SHARDS.inc();
                continue;
            }

            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) => return Err(StoreError::io(&path, e)),
            };

            entries.insert(
                header.key,
                IndexEntry {
                    file_time: header.file_time,
                    updated_at: header.updated_at,
                    size,
                },
            );
        }

        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    pub fn get(&self, key: &str) -> Option<IndexEntry> {
        self.entries.read().get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn insert(&self, key: String, entry: IndexEntry) {
        self.entries.write().insert(key, entry);
    }

    pub fn remove(&self, key: &str) -> Option<IndexEntry> {
        self.entries.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Largest identity token in the index (0 when empty).
    pub fn max_file_time(&self) -> i64 {
        self.entries
            .read()
            .values()
            .map(|e| e.file_time)
            .max()
            .unwrap_or(0)
    }

    /// Entries after the `(since, after_key)` cursor in `(updated_at, key)`
    /// order. Without `after_key` every entry stamped exactly `since` is
    /// skipped; with it, those sorting after `after_key` are included.
    pub fn changed_since(
        &self,
        since: DateTime<Utc>,
        after_key: Option<&str>,
        limit: usize,
    ) -> Vec<(String, IndexEntry)> {
        let mut changed: Vec<(String, IndexEntry)> = self
            .entries
            .read()
            .iter()
            .filter(|(k, e)| {
                e.updated_at > since
                    || (e.updated_at == since && after_key.is_some_and(|after| k.as_str() > after))
            })
            .map(|(k, e)| (k.clone(), *e))
            .collect();
        changed.sort_by(|a, b| {
            a.1.updated_at
                .cmp(&b.1.updated_at)
                .then_with(|| a.0.cmp(&b.0))
        });
        changed.truncate(limit);
        changed
    }

    /// Swap in a freshly loaded index.
    pub fn replace_with(&self, other: MasterIndex) {
        let fresh = other.entries.into_inner();
        *self.entries.write() = fresh;
    }
}
