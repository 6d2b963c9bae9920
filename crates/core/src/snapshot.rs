//! Read-only, full-corpus search snapshot ("FastDB").
//!
//! Rebuilt from the store in the background and swapped in whole, so a
//! search always sees one complete generation and never opens shard files.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::DuplicatesConfig;
use crate::key::is_numeric_token;
use crate::metrics::{SNAPSHOT_REBUILD_DURATION, SNAPSHOT_RECORDS};
use crate::normalize::Normalizer;
use crate::record::TorrentRecord;
use crate::store::BucketStore;

/// A record together with the shard that held it at build time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub record: TorrentRecord,
}

/// Search parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    /// Match whole normalized names only.
    #[serde(default)]
    pub exact: bool,
    #[serde(default)]
    pub tracker: Option<String>,
    #[serde(default, rename = "type")]
    pub type_tag: Option<String>,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            exact: false,
            tracker: None,
            type_tag: None,
            year: None,
            limit: default_limit(),
        }
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn with_tracker(mut self, tracker: impl Into<String>) -> Self {
        self.tracker = Some(tracker.into());
        self
    }

    pub fn with_type(mut self, tag: impl Into<String>) -> Self {
        self.type_tag = Some(tag.into());
        self
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub key: String,
    #[serde(flatten)]
    pub record: TorrentRecord,
    /// Other trackers carrying the same torrent (same info-hash).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub also_on: Vec<String>,
}

/// One immutable generation of the search corpus.
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    built_at: DateTime<Utc>,
    entries: Vec<SnapshotEntry>,
    /// Normalized name -> entry positions.
    by_name: HashMap<String, Vec<usize>>,
}

impl Snapshot {
    /// Generation 0: nothing built yet.
    pub fn empty() -> Self {
        Self::build(0, Vec::new())
    }

    pub fn build(generation: u64, entries: Vec<SnapshotEntry>) -> Self {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            let r = &entry.record;
            if !r.search_name.is_empty() {
                by_name.entry(r.search_name.clone()).or_default().push(i);
            }
            if !r.search_originalname.is_empty() && r.search_originalname != r.search_name {
                by_name
                    .entry(r.search_originalname.clone())
                    .or_default()
                    .push(i);
            }
        }
        Self {
            generation,
            built_at: Utc::now(),
            entries,
            by_name,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Records matching `query`, best first.
    ///
    /// Ordered by seeders, then by most recent update. With
    /// `merge_duplicates`, hits sharing a magnet info-hash collapse into the
    /// best one; numeric titles only collapse when `merge_num_duplicates`.
    pub fn search(
        &self,
        normalizer: &Normalizer,
        query: &SearchQuery,
        duplicates: &DuplicatesConfig,
    ) -> Vec<SearchHit> {
        let needle = normalizer.normalize(&query.query);
        if needle.is_empty() || query.limit == 0 {
            return Vec::new();
        }

        let mut positions: BTreeSet<usize> = BTreeSet::new();
        if query.exact {
            if let Some(found) = self.by_name.get(&needle) {
                positions.extend(found.iter().copied());
            }
        } else {
            for (name, found) in &self.by_name {
                if name.contains(&needle) {
                    positions.extend(found.iter().copied());
                }
            }
        }

        let mut matched: Vec<&SnapshotEntry> = positions
            .into_iter()
            .map(|i| &self.entries[i])
            .filter(|e| matches_filters(&e.record, query))
            .collect();
        matched.sort_by(|a, b| {
            b.record
                .seeders
                .cmp(&a.record.seeders)
                .then_with(|| b.record.update_time.cmp(&a.record.update_time))
                .then_with(|| a.record.url.cmp(&b.record.url))
        });

        let mut hits: Vec<SearchHit> = Vec::new();
        let mut by_hash: HashMap<String, usize> = HashMap::new();
        for entry in matched {
            let mergeable = duplicates.merge_duplicates
                && (duplicates.merge_num_duplicates
                    || !is_numeric_token(&entry.record.search_name));
            let hash = if mergeable {
                entry.record.info_hash()
            } else {
                None
            };

            if let Some(&at) = hash.as_ref().and_then(|h| by_hash.get(h)) {
                let best = &mut hits[at];
                let tracker = &entry.record.tracker_name;
                if *tracker != best.record.tracker_name && !best.also_on.contains(tracker) {
                    best.also_on.push(tracker.clone());
                }
                continue;
            }

            // keep scanning past the limit so kept hits still collect `also_on`
            if hits.len() >= query.limit {
                continue;
            }
            if let Some(hash) = hash {
                by_hash.insert(hash, hits.len());
            }
            hits.push(SearchHit {
                key: entry.key.clone(),
                record: entry.record.clone(),
                also_on: Vec::new(),
            });
        }

        hits
    }
}

fn matches_filters(record: &TorrentRecord, query: &SearchQuery) -> bool {
    if let Some(tracker) = &query.tracker {
        if !record.tracker_name.eq_ignore_ascii_case(tracker) {
            return false;
        }
    }
    if let Some(tag) = &query.type_tag {
        if !record.has_type(tag) {
            return false;
        }
    }
    if let Some(year) = query.year {
        if record.release_year != year {
            return false;
        }
    }
    true
}

/// Holder of the published snapshot.
pub struct FastDb {
    current: RwLock<Arc<Snapshot>>,
    rebuild_lock: Mutex<()>,
}

impl Default for FastDb {
    fn default() -> Self {
        Self::new()
    }
}

impl FastDb {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::empty())),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// The latest complete generation.
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Build a new generation from every shard in the store and publish it.
    ///
    /// Rebuilds are serialized, so generations only move forward and each
    /// one starts from data at least as new as the previous one. Shards that
    /// cannot be read are logged and left out of this generation.
    pub async fn rebuild(&self, store: &BucketStore) -> Arc<Snapshot> {
        let _rebuilding = self.rebuild_lock.lock().await;
        let started = Instant::now();
        let generation = self.current().generation + 1;

        let mut entries = Vec::new();
        for key in store.keys() {
            match store.read_uncached(&key).await {
                Ok(records) => entries.extend(records.values().map(|record| SnapshotEntry {
                    key: key.clone(),
                    record: record.clone(),
                })),
                Err(e) => warn!(key = %key, error = %e, "Skipping shard in snapshot rebuild"),
            }
        }

        let snapshot = Arc::new(Snapshot::build(generation, entries));
        *self.current.write() = snapshot.clone();

        let elapsed = started.elapsed();
        SNAPSHOT_REBUILD_DURATION
            .with_label_values(&[])
            .observe(elapsed.as_secs_f64());
        SNAPSHOT_RECORDS.set(snapshot.len() as i64);
        info!(
            generation,
            records = snapshot.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Rebuilt search snapshot"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::merge::UpsertDecider;
    use crate::testing::fixtures::record;
    use tempfile::TempDir;

    const HASH_A: &str = "magnet:?xt=urn:btih:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn entry(key: &str, mut record: TorrentRecord) -> SnapshotEntry {
        record.refresh_search_names(&Normalizer::default());
        SnapshotEntry {
            key: key.to_string(),
            record,
        }
    }

    fn sample() -> Snapshot {
        Snapshot::build(
            1,
            vec![
                entry(
                    "интерстеллар:interstellar",
                    record("http://a/1", "Интерстеллар", "Interstellar")
                        .with_peers(10, 0)
                        .with_release_year(2014)
                        .with_types(["movie"]),
                ),
                entry(
                    "интерстеллар:interstellar",
                    record("http://b/1", "Интерстеллар", "Interstellar")
                        .with_peers(30, 0)
                        .with_release_year(2014)
                        .with_types(["movie"]),
                ),
                entry(
                    "звезды:stars",
                    record("http://c/1", "Звезды", "Stars")
                        .with_peers(5, 0)
                        .with_types(["serial"]),
                ),
            ],
        )
    }

    fn no_merge() -> DuplicatesConfig {
        DuplicatesConfig {
            merge_duplicates: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_search_uses_either_name() {
        let snap = sample();
        let n = Normalizer::default();
        let by_orig = snap.search(&n, &SearchQuery::new("INTERSTELLAR").exact(), &no_merge());
        assert_eq!(by_orig.len(), 2);
        let by_local = snap.search(&n, &SearchQuery::new("интерстеллар").exact(), &no_merge());
        assert_eq!(by_local.len(), 2);
        assert!(snap
            .search(&n, &SearchQuery::new("inter").exact(), &no_merge())
            .is_empty());
    }

    #[test]
    fn test_substring_search_and_ordering() {
        let snap = sample();
        let hits = snap.search(
            &Normalizer::default(),
            &SearchQuery::new("stel"),
            &no_merge(),
        );
        let urls: Vec<_> = hits.iter().map(|h| h.record.url.as_str()).collect();
        assert_eq!(urls, vec!["http://b/1", "http://a/1"]);
    }

    #[test]
    fn test_filters_and_limit() {
        let snap = sample();
        let n = Normalizer::default();

        let q = SearchQuery::new("s").with_type("serial");
        assert_eq!(snap.search(&n, &q, &no_merge()).len(), 1);

        let q = SearchQuery::new("interstellar").with_tracker("rutor");
        assert_eq!(snap.search(&n, &q, &no_merge()).len(), 0);
        let q = SearchQuery::new("interstellar").with_tracker("TEST");
        assert_eq!(snap.search(&n, &q, &no_merge()).len(), 2);

        let q = SearchQuery::new("interstellar").with_year(2014).with_limit(1);
        let hits = snap.search(&n, &q, &no_merge());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.seeders, 30);
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let snap = sample();
        assert!(snap
            .search(&Normalizer::default(), &SearchQuery::new(" - "), &no_merge())
            .is_empty());
    }

    #[test]
    fn test_duplicates_merge_by_info_hash() {
        let mut a = record("http://a/1", "Matrix", "Matrix")
            .with_magnet(HASH_A)
            .with_peers(5, 0);
        a.tracker_name = "rutor".to_string();
        // same hash, different case
        let mut b = record("http://b/1", "Matrix", "Matrix")
            .with_magnet("magnet:?xt=urn:btih:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA&dn=Matrix")
            .with_peers(50, 0);
        b.tracker_name = "kinozal".to_string();
        let snap = Snapshot::build(
            1,
            vec![entry("matrix:matrix", a), entry("matrix:matrix", b)],
        );

        let hits = snap.search(
            &Normalizer::default(),
            &SearchQuery::new("matrix"),
            &DuplicatesConfig::default(),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.tracker_name, "kinozal");
        assert_eq!(hits[0].also_on, vec!["rutor".to_string()]);
    }

    #[test]
    fn test_numeric_titles_not_merged_when_disabled() {
        let mut a = record("http://a/1", "1984", "1984").with_magnet(HASH_A);
        a.tracker_name = "rutor".to_string();
        let mut b = record("http://b/1", "1984", "1984").with_magnet(HASH_A);
        b.tracker_name = "kinozal".to_string();
        let snap = Snapshot::build(1, vec![entry("1984:1984", a), entry("1984:1984", b)]);

        let strict = DuplicatesConfig {
            merge_num_duplicates: false,
            ..Default::default()
        };
        let n = Normalizer::default();
        let q = SearchQuery::new("1984");
        assert_eq!(snap.search(&n, &q, &strict).len(), 2);
        assert_eq!(snap.search(&n, &q, &DuplicatesConfig::default()).len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_from_store_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let store = BucketStore::open(StoreConfig::at(dir.path())).await.unwrap();
        let fastdb = FastDb::new();
        assert_eq!(fastdb.current().generation(), 0);

        store
            .add_or_update(vec![record("http://t/1", "Matrix", "Matrix")], &UpsertDecider)
            .await;
        let first = fastdb.rebuild(&store).await;
        assert_eq!(first.generation(), 1);
        assert_eq!(first.len(), 1);

        store
            .add_or_update(vec![record("http://t/2", "Alien", "Alien")], &UpsertDecider)
            .await;
        // old generation stays intact for whoever still holds it
        let second = fastdb.rebuild(&store).await;
        assert_eq!(second.generation(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(first.len(), 1);
        assert_eq!(fastdb.current().generation(), 2);
    }

    #[test]
    fn test_query_deserialize_defaults() {
        let q: SearchQuery = serde_json::from_str(r#"{"query":"matrix","type":"movie"}"#).unwrap();
        assert!(!q.exact);
        assert_eq!(q.type_tag.as_deref(), Some("movie"));
        assert_eq!(q.limit, 100);
    }
}
