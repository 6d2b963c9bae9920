//! Testing utilities shared by unit and integration tests.
//!
//! ```rust,ignore
//! use trackerdb_core::testing::{fixtures, RecordingDecider};
//!
//! let decider = RecordingDecider::new();
//! store.add_or_update(vec![fixtures::record("http://t/1", "Dune", "Dune")], &decider).await;
//! assert_eq!(decider.call_count(), 1);
//! ```

mod recording_decider;

pub use recording_decider::{RecordedDecision, RecordingDecider};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::config::StoreConfig;
    use crate::record::TorrentRecord;
    use std::path::Path;

    /// Tracker name used by every fixture record.
    pub const TRACKER: &str = "test";

    /// A candidate from the fixture tracker with title `"<name> / <orig>"`.
    pub fn record(url: &str, name: &str, originalname: &str) -> TorrentRecord {
        TorrentRecord::new(
            url,
            TRACKER,
            format!("{} / {}", name, originalname),
            name,
            originalname,
        )
    }

    /// Same as [`record`] from another tracker.
    pub fn record_from(tracker: &str, url: &str, name: &str, originalname: &str) -> TorrentRecord {
        let mut r = record(url, name, originalname);
        r.tracker_name = tracker.to_string();
        r
    }

    /// `count` records in distinct shards: `<prefix>x0:<prefix>x0`, `<prefix>x1:<prefix>x1`, ...
    pub fn distinct_records(prefix: &str, count: usize) -> Vec<TorrentRecord> {
        (0..count)
            .map(|i| {
                let name = format!("{}x{}", prefix, i);
                record(&format!("http://{}/{}", prefix, i), &name, &name)
            })
            .collect()
    }

    /// A store config rooted at `path` with short timeouts for tests.
    pub fn store_config(path: &Path) -> StoreConfig {
        let mut config = StoreConfig::at(path);
        config.write_lock_timeout_ms = 5_000;
        config.io_timeout_ms = 5_000;
        config.decide_timeout_ms = 5_000;
        config
    }
}
