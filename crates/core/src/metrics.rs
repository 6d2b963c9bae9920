//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Bucket store (shard reads, flushes, corrupt files, cache size)
//! - Merge engine (candidate outcomes)
//! - Snapshot builder (rebuild duration, record count)

use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
};

// =============================================================================
// Bucket Store Metrics
// =============================================================================

/// Shard reads by where the data came from.
pub static SHARD_READS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trackerdb_shard_reads_total", "Total shard reads"),
        &["source"], // "cache", "disk", "empty"
    )
    .unwrap()
});

/// Shard flushes by result.
pub static SHARD_FLUSHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trackerdb_shard_flushes_total", "Total shard flush attempts"),
        &["result"], // "ok", "error", "removed"
    )
    .unwrap()
});

/// Shard files that could not be parsed and were loaded as empty.
pub static CORRUPT_SHARDS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "trackerdb_corrupt_shards_total",
        "Total shard files treated as empty because they could not be read",
    )
    .unwrap()
});

/// Shards currently held in memory.
pub static CACHE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("trackerdb_cache_entries", "Number of cached shards").unwrap()
});

/// Clean shards dropped from the cache by the sweep.
pub static CACHE_EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "trackerdb_cache_evictions_total",
        "Total shards evicted from the cache",
    )
    .unwrap()
});

// =============================================================================
// Merge Metrics
// =============================================================================

/// Merge candidates by outcome.
pub static MERGE_CANDIDATES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "trackerdb_merge_candidates_total",
            "Total candidates processed by the merge engine",
        ),
        &["outcome"], // "added", "updated", "skipped", "failed"
    )
    .unwrap()
});

// =============================================================================
// Snapshot Metrics
// =============================================================================

/// Snapshot rebuild duration in seconds.
pub static SNAPSHOT_REBUILD_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "trackerdb_snapshot_rebuild_duration_seconds",
            "Duration of search snapshot rebuilds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &[],
    )
    .unwrap()
});

/// Records in the currently published snapshot.
pub static SNAPSHOT_RECORDS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "trackerdb_snapshot_records",
        "Number of records in the published search snapshot",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Store
        Box::new(SHARD_READS.clone()),
        Box::new(SHARD_FLUSHES.clone()),
        Box::new(CORRUPT_SHARDS.clone()),
        Box::new(CACHE_ENTRIES.clone()),
        Box::new(CACHE_EVICTIONS.clone()),
        // Merge
        Box::new(MERGE_CANDIDATES.clone()),
        // Snapshot
        Box::new(SNAPSHOT_REBUILD_DURATION.clone()),
        Box::new(SNAPSHOT_RECORDS.clone()),
    ]
}
