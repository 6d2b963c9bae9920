//! Batch add-or-update of scraped candidates.
//!
//! Candidates are grouped by shard key; each group takes its shard's write
//! lock once and runs every candidate of the group through the caller's
//! [`MergeDecider`] while holding it. Groups for different shards run
//! concurrently, bounded by `store.merge_concurrency`.

use std::collections::BTreeMap;
use std::ops::AddAssign;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::ingest_log::{IngestAction, IngestEvent};
use crate::metrics::MERGE_CANDIDATES;
use crate::record::TorrentRecord;
use crate::store::{BucketStore, ShardMap};

/// What to do with one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Add,
    Update,
    Skip,
    /// Candidate rejected; the reason is logged, the batch goes on.
    Fail(String),
}

/// Everything a decider may look at, borrowed from the locked shard.
#[derive(Debug, Clone, Copy)]
pub struct DecideContext<'a> {
    pub key: &'a str,
    pub existing: Option<&'a TorrentRecord>,
    pub shard: &'a ShardMap,
}

/// Caller-supplied merge policy.
///
/// Runs while the shard's write lock is held, so slow work here (fetching a
/// torrent file to confirm a magnet, say) delays other writers of the same
/// shard. The candidate may be modified before it is stored, but not moved:
/// a changed url, or names that produce another shard key, fail the candidate.
#[async_trait]
pub trait MergeDecider: Send + Sync {
    async fn decide(&self, candidate: &mut TorrentRecord, ctx: DecideContext<'_>) -> Decision;
}

/// Add new records, update changed ones, skip identical ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertDecider;

#[async_trait]
impl MergeDecider for UpsertDecider {
    async fn decide(&self, candidate: &mut TorrentRecord, ctx: DecideContext<'_>) -> Decision {
        match ctx.existing {
            None => Decision::Add,
            Some(existing) if existing.same_content(candidate) => Decision::Skip,
            Some(_) => Decision::Update,
        }
    }
}

/// Adapts a plain synchronous function into a [`MergeDecider`].
pub struct DecideFn<F>(pub F);

impl<F> DecideFn<F>
where
    F: Fn(&TorrentRecord, Option<&TorrentRecord>) -> Decision + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> MergeDecider for DecideFn<F>
where
    F: Fn(&TorrentRecord, Option<&TorrentRecord>) -> Decision + Send + Sync,
{
    async fn decide(&self, candidate: &mut TorrentRecord, ctx: DecideContext<'_>) -> Decision {
        (self.0)(candidate, ctx.existing)
    }
}

/// Per-outcome counts of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl MergeStats {
    pub fn total(&self) -> usize {
        self.added + self.updated + self.skipped + self.failed
    }

    fn all_failed(count: usize) -> Self {
        Self {
            failed: count,
            ..Default::default()
        }
    }
}

impl AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl BucketStore {
    /// Merge a batch of candidates into the store.
    ///
    /// Candidates without a valid shard key or url are counted as failed
    /// before any shard is touched. Added/updated records get fresh search
    /// names and `update_time`, and `size_bytes` parsed from `size_display`
    /// when it is 0; an updated record keeps the stored
    /// `create_time` and metadata unless the candidate brings its own.
    pub async fn add_or_update<D>(&self, candidates: Vec<TorrentRecord>, decider: &D) -> MergeStats
    where
        D: MergeDecider + ?Sized,
    {
        if candidates.is_empty() {
            return MergeStats::default();
        }

        let total = candidates.len();
        let mut stats = MergeStats::default();
        let mut groups: BTreeMap<String, Vec<TorrentRecord>> = BTreeMap::new();
        for candidate in candidates {
            let key = match self.bucket_key(&candidate.name, &candidate.originalname) {
                Some(key) if !candidate.url.is_empty() => key,
                _ => {
                    debug!(
                        url = %candidate.url,
                        tracker = %candidate.tracker_name,
                        "Rejecting candidate without a valid shard key"
                    );
                    stats.failed += 1;
                    continue;
                }
            };
            groups.entry(key).or_default().push(candidate);
        }

        let concurrency = self.config().merge_concurrency.max(1);
        let results: Vec<MergeStats> = stream::iter(groups)
            .map(|(key, group)| self.merge_group(key, group, decider))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        for group_stats in results {
            stats += group_stats;
        }

        MERGE_CANDIDATES
            .with_label_values(&["added"])
            .inc_by(stats.added as u64);
        MERGE_CANDIDATES
            .with_label_values(&["updated"])
            .inc_by(stats.updated as u64);
        MERGE_CANDIDATES
            .with_label_values(&["skipped"])
            .inc_by(stats.skipped as u64);
        MERGE_CANDIDATES
            .with_label_values(&["failed"])
            .inc_by(stats.failed as u64);

        debug!(
            candidates = total,
            added = stats.added,
            updated = stats.updated,
            skipped = stats.skipped,
            failed = stats.failed,
            "Merge batch complete"
        );
        stats
    }

    async fn merge_group<D>(&self, key: String, group: Vec<TorrentRecord>, decider: &D) -> MergeStats
    where
        D: MergeDecider + ?Sized,
    {
        let mut shard = match self.open_write(&key).await {
            Ok(shard) => shard,
            Err(e) => {
                warn!(key = %key, error = %e, candidates = group.len(), "Could not open shard for merge");
                return MergeStats::all_failed(group.len());
            }
        };

        let decide_timeout = self.config().decide_timeout();
        let mut stats = MergeStats::default();

        for mut candidate in group {
            // before deciding, so an unchanged re-ingest still compares equal
            candidate.fill_size_from_display();
            let url = candidate.url.clone();
            let existing = shard.get(&url).cloned();
            let ctx = DecideContext {
                key: &key,
                existing: existing.as_ref(),
                shard: shard.records(),
            };
            let decision =
                match tokio::time::timeout(decide_timeout, decider.decide(&mut candidate, ctx)).await
                {
                    Ok(decision) => decision,
                    Err(_) => Decision::Fail("decision timed out".to_string()),
                };

            let moved = matches!(decision, Decision::Add | Decision::Update)
                && (candidate.url != url
                    || self
                        .bucket_key(&candidate.name, &candidate.originalname)
                        .as_deref()
                        != Some(key.as_str()));
            if moved {
                debug!(
                    key = %key,
                    url = %url,
                    "Decider moved the candidate out of its shard, rejecting"
                );
                stats.failed += 1;
                continue;
            }

            match decision {
                Decision::Add | Decision::Update => {
                    let action = if existing.is_some() {
                        stats.updated += 1;
                        IngestAction::Updated
                    } else {
                        stats.added += 1;
                        IngestAction::Added
                    };
                    self.prepare_for_write(&mut candidate, existing.as_ref());
                    if let Some(log) = self.ingest_log() {
                        log.try_emit(IngestEvent::from_record(action, &key, &candidate));
                    }
                    shard.insert(candidate);
                }
                Decision::Skip => stats.skipped += 1,
                Decision::Fail(reason) => {
                    debug!(key = %key, url = %candidate.url, reason = %reason, "Candidate failed");
                    stats.failed += 1;
                }
            }
        }

        stats
    }

    fn prepare_for_write(&self, candidate: &mut TorrentRecord, existing: Option<&TorrentRecord>) {
        let now = Utc::now();
        candidate.refresh_search_names(self.normalizer());
        candidate.fill_size_from_display();
        candidate.update_time = now;
        match existing {
            Some(existing) => {
                candidate.create_time = existing.create_time;
                if candidate.metadata.is_none() {
                    candidate.metadata = existing.metadata.clone();
                    candidate.metadata_attempts = existing.metadata_attempts;
                }
            }
            // deserialized candidates without a create_time carry the epoch
            None if candidate.create_time == DateTime::<Utc>::default() => {
                candidate.create_time = now;
            }
            None => {}
        }
    }
}
