//! Store side of the media metadata pipeline.
//!
//! An external prober picks records without metadata, probes their magnet
//! and writes the result back. The store only selects candidates and keeps
//! the per-record retry counter.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::record::TorrentRecord;
use crate::store::{BucketStore, StoreError};

/// Types the prober never handles: long multi-file releases.
pub const EXCLUDED_TYPES: &[&str] = &["sport", "tvshow", "docuserial"];

/// Non-recent windows only consider releases still being updated.
const ACTIVE_UPDATE_DAYS: i64 = 20;

/// Which slice of the store a metadata pass looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "window", rename_all = "snake_case")]
pub enum MetadataWindow {
    /// Created within the last `days`.
    Recent { days: u32 },
    /// Created within `days`, excluding the last day.
    Month { days: u32 },
    /// Created within `months`, excluding the last `skip_days`.
    Year { skip_days: u32, months: u32 },
    /// Created before `months` ago.
    Older { months: u32 },
    /// Updated within the last `days`, regardless of creation.
    Updates { days: u32 },
}

impl MetadataWindow {
    fn contains(&self, record: &TorrentRecord, now: DateTime<Utc>) -> bool {
        let created = record.create_time;
        match *self {
            MetadataWindow::Recent { days } => created >= days_ago(now, days),
            MetadataWindow::Month { days } => {
                created < days_ago(now, 1) && created >= days_ago(now, days)
            }
            MetadataWindow::Year { skip_days, months } => {
                created < days_ago(now, skip_days) && created >= months_ago(now, months)
            }
            MetadataWindow::Older { months } => created < months_ago(now, months),
            MetadataWindow::Updates { days } => record.update_time >= days_ago(now, days),
        }
    }

    fn requires_activity(&self) -> bool {
        !matches!(self, MetadataWindow::Recent { .. })
    }

    fn limits_attempts(&self) -> bool {
        matches!(
            self,
            MetadataWindow::Year { .. } | MetadataWindow::Older { .. } | MetadataWindow::Updates { .. }
        )
    }
}

fn days_ago(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

fn months_ago(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A record the prober should look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataCandidate {
    pub key: String,
    pub url: String,
    pub magnet: String,
    pub update_time: DateTime<Utc>,
    pub attempts: u8,
}

fn is_candidate(
    record: &TorrentRecord,
    window: &MetadataWindow,
    now: DateTime<Utc>,
    max_attempts: u8,
) -> bool {
    if record.magnet.as_deref().map_or(true, str::is_empty) || record.metadata.is_some() {
        return false;
    }
    if EXCLUDED_TYPES.iter().any(|t| record.has_type(t)) {
        return false;
    }
    if !window.contains(record, now) {
        return false;
    }
    if window.requires_activity()
        && (record.seeders == 0
            || record.update_time <= now - Duration::days(ACTIVE_UPDATE_DAYS))
    {
        return false;
    }
    !(window.limits_attempts() && record.metadata_attempts >= max_attempts)
}

/// Records in `window` that still need metadata, most recently updated first.
///
/// Reads every shard without filling the cache. Unreadable shards are
/// logged and skipped.
pub async fn collect_metadata_candidates(
    store: &BucketStore,
    window: MetadataWindow,
    now: DateTime<Utc>,
    max_attempts: u8,
) -> Vec<MetadataCandidate> {
    let mut found = Vec::new();
    for key in store.keys() {
        let records = match store.read_uncached(&key).await {
            Ok(records) => records,
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping shard in metadata scan");
                continue;
            }
        };
        for record in records.values() {
            if !is_candidate(record, &window, now, max_attempts) {
                continue;
            }
            if let Some(magnet) = &record.magnet {
                found.push(MetadataCandidate {
                    key: key.clone(),
                    url: record.url.clone(),
                    magnet: magnet.clone(),
                    update_time: record.update_time,
                    attempts: record.metadata_attempts,
                });
            }
        }
    }
    found.sort_by(|a, b| b.update_time.cmp(&a.update_time).then_with(|| a.url.cmp(&b.url)));
    debug!(?window, candidates = found.len(), "Collected metadata candidates");
    found
}

impl BucketStore {
    /// Store the prober's result on one record.
    pub async fn record_metadata(
        &self,
        key: &str,
        url: &str,
        blob: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut shard = self.open_write(key).await?;
        let record = shard
            .records_mut()
            .get_mut(url)
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
                url: url.to_string(),
            })?;
        record.metadata = Some(blob);
        Ok(())
    }

    /// Count one more probe attempt. Returns the new count.
    pub async fn bump_metadata_attempts(&self, key: &str, url: &str) -> Result<u8, StoreError> {
        let mut shard = self.open_write(key).await?;
        let record = shard
            .records_mut()
            .get_mut(url)
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
                url: url.to_string(),
            })?;
        record.metadata_attempts = record.metadata_attempts.saturating_add(1);
        Ok(record.metadata_attempts)
    }
}
