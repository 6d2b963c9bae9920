//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the trackerdb server:
//! - HTTP request metrics (latency, counts, in flight)
//! - Store and background loop status (collected on scrape)
//! - Every core metric, registered into the same registry

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use regex_lite::Regex;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "trackerdb_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trackerdb_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "trackerdb_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Store Status (collected dynamically)
// =============================================================================

/// Shards known to the store.
pub static STORE_SHARDS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("trackerdb_store_shards", "Number of shards in the store").unwrap()
});

/// Shards with changes not yet on disk.
pub static STORE_DIRTY_SHARDS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "trackerdb_store_dirty_shards",
        "Number of shards waiting to be flushed",
    )
    .unwrap()
});

/// Background loops running state (1 = running, 0 = stopped).
pub static CRON_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "trackerdb_cron_running",
        "Whether the persistence loops are running (1) or stopped (0)",
    )
    .unwrap()
});

/// Generation of the published search snapshot.
pub static SNAPSHOT_GENERATION: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "trackerdb_snapshot_generation",
        "Generation number of the current search snapshot",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Store status
    registry.register(Box::new(STORE_SHARDS.clone())).unwrap();
    registry
        .register(Box::new(STORE_DIRTY_SHARDS.clone()))
        .unwrap();
    registry.register(Box::new(CRON_RUNNING.clone())).unwrap();
    registry
        .register(Box::new(SNAPSHOT_GENERATION.clone()))
        .unwrap();

    // Core metrics (store, merge, snapshot)
    for metric in trackerdb_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the status gauges reflect the moment of the scrape.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let stats = state.store().stats();
    STORE_SHARDS.set(stats.shards as i64);
    STORE_DIRTY_SHARDS.set(stats.dirty as i64);

    let status = state.cron().status();
    CRON_RUNNING.set(if status.running { 1 } else { 0 });
    SNAPSHOT_GENERATION.set(status.snapshot_generation as i64);
}

static HASH_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9a-fA-F]{40}").unwrap());
static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());
static BUCKET_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/buckets/[^/]+").unwrap());

/// Normalize a path for metric labels (replace keys and IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = BUCKET_SEGMENT.replace_all(path, "/buckets/{key}");
    let result = HASH_SEGMENT.replace_all(&result, "{hash}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.to_string()
}
