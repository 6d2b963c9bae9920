//! Operator repair tooling.
//!
//! Every operation walks the store's key enumeration and takes shard write
//! locks one at a time; none of them holds two shard locks at once.

use chrono::{DateTime, Days, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::key::DuplicateKeyPolicy;
use crate::record::{parse_size_display, TorrentRecord};
use crate::store::{BucketStore, StoreError};

/// Result of [`BucketStore::update_search_names`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchNameReport {
    pub scanned: usize,
    /// Records whose names or search fields changed in place.
    pub fixed: usize,
    /// Records moved to the shard their corrected names point at.
    pub migrated: usize,
    /// Records with no usable name at all, deleted.
    pub dropped: usize,
    /// Shards left empty and deleted.
    pub removed_buckets: usize,
}

/// Result of [`BucketStore::update_sizes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub scanned: usize,
    /// Records whose `size_bytes` was rewritten from their size label.
    pub updated: usize,
    /// Records carrying a label that names no known unit.
    pub unparsable: usize,
}

/// Result of [`BucketStore::reset_check_time`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckTimeReport {
    pub scanned: usize,
    pub reset: usize,
    pub check_time: DateTime<Utc>,
}

/// One suspicious record found by [`BucketStore::find_corrupt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptSample {
    pub key: String,
    pub url: String,
    pub problems: Vec<&'static str>,
}

/// Result of [`BucketStore::find_corrupt`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorruptReport {
    pub scanned: usize,
    pub missing_name: usize,
    pub missing_originalname: usize,
    pub missing_tracker: usize,
    pub empty_search_fields: usize,
    pub samples: Vec<CorruptSample>,
}

/// Result of [`BucketStore::remove_bucket`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoveBucketReport {
    pub migrated: usize,
    pub removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_key: Option<String>,
}

/// Fill missing names from the title, the way scrapers would have.
fn fill_missing_names(record: &mut TorrentRecord) {
    if record.name.trim().is_empty() {
        record.name = record.title.clone();
    }
    if record.originalname.trim().is_empty() {
        record.originalname = if record.title.trim().is_empty() {
            record.name.clone()
        } else {
            record.title.clone()
        };
    }
}

fn problems(record: &TorrentRecord) -> Vec<&'static str> {
    let mut found = Vec::new();
    if record.name.trim().is_empty() {
        found.push("name");
    }
    if record.originalname.trim().is_empty() {
        found.push("originalname");
    }
    if record.tracker_name.trim().is_empty() {
        found.push("tracker_name");
    }
    if record.search_name.is_empty() || record.search_originalname.is_empty() {
        found.push("search_fields");
    }
    found
}

impl BucketStore {
    /// Recompute derived names for every record and move misplaced records.
    ///
    /// Per shard: fill empty `name`/`originalname`, refresh the search
    /// fields, drop records that still have no valid key, then migrate the
    /// ones whose key changed. Shards left empty are deleted.
    pub async fn update_search_names(&self) -> Result<SearchNameReport, StoreError> {
        let mut report = SearchNameReport::default();

        for key in self.keys() {
            let mut moves = Vec::new();
            {
                let mut shard = self.open_write(&key).await?;
                let urls: Vec<String> = shard.records().keys().cloned().collect();
                for url in urls {
                    let Some(current) = shard.get(&url).cloned() else {
                        continue;
                    };
                    report.scanned += 1;

                    let mut updated = current.clone();
                    fill_missing_names(&mut updated);
                    let Some(target) = updated.bucket_key(self.normalizer()) else {
                        warn!(key = %key, url = %url, "Dropping record without usable names");
                        shard.remove(&url);
                        report.dropped += 1;
                        continue;
                    };
                    updated.refresh_search_names(self.normalizer());

                    if updated != current {
                        shard.insert(updated.clone());
                        report.fixed += 1;
                    }
                    if target != key {
                        moves.push((updated, target));
                    }
                }
            }

            for (record, target) in moves {
                let url = record.url.clone();
                match self.migrate_to_new_key(&key, record, &target).await {
                    Ok(()) => report.migrated += 1,
                    Err(e) => warn!(url = %url, from = %key, to = %target, error = %e, "Migration failed"),
                }
            }

            match self.remove_empty_shard(&key).await {
                Ok(true) => report.removed_buckets += 1,
                Ok(false) | Err(StoreError::NotEmpty(_)) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to remove emptied shard"),
            }
        }

        info!(
            scanned = report.scanned,
            fixed = report.fixed,
            migrated = report.migrated,
            dropped = report.dropped,
            removed_buckets = report.removed_buckets,
            "Search name repair complete"
        );
        Ok(report)
    }

    /// Recompute `size_bytes` from `size_display` for every record whose
    /// label parses. Records without a usable label keep their size.
    pub async fn update_sizes(&self) -> Result<SizeReport, StoreError> {
        let mut report = SizeReport::default();
        let now = Utc::now();

        for key in self.keys() {
            let mut shard = self.open_write(&key).await?;
            let mut changed = Vec::new();
            for record in shard.records().values() {
                report.scanned += 1;
                let Some(label) = record.size_display.as_deref() else {
                    continue;
                };
                match parse_size_display(label) {
                    Some(bytes) if bytes != record.size_bytes => {
                        let mut updated = record.clone();
                        updated.size_bytes = bytes;
                        updated.update_time = now;
                        changed.push(updated);
                    }
                    Some(_) => {}
                    None => report.unparsable += 1,
                }
            }
            report.updated += changed.len();
            for record in changed {
                shard.insert(record);
            }
        }

        info!(
            scanned = report.scanned,
            updated = report.updated,
            unparsable = report.unparsable,
            "Size repair complete"
        );
        Ok(report)
    }

    /// Move every record's `check_time` to the start of yesterday (UTC), so
    /// the next checker pass revisits all of them.
    pub async fn reset_check_time(&self) -> Result<CheckTimeReport, StoreError> {
        let check_time = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(1))
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc())
            .unwrap_or_default();
        let mut report = CheckTimeReport {
            check_time,
            ..Default::default()
        };

        for key in self.keys() {
            let mut shard = self.open_write(&key).await?;
            let stale: Vec<String> = shard
                .iter()
                .filter(|(_, record)| record.check_time != check_time)
                .map(|(url, _)| url.clone())
                .collect();
            report.scanned += shard.len();
            report.reset += stale.len();
            if stale.is_empty() {
                continue;
            }
            let records = shard.records_mut();
            for url in stale {
                if let Some(record) = records.get_mut(&url) {
                    record.check_time = check_time;
                }
            }
        }

        info!(
            scanned = report.scanned,
            reset = report.reset,
            check_time = %report.check_time,
            "Check time reset complete"
        );
        Ok(report)
    }

    /// Read-only scan for records with missing names or search fields.
    /// At most `sample_size` offenders are returned verbatim.
    pub async fn find_corrupt(&self, sample_size: usize) -> Result<CorruptReport, StoreError> {
        let mut report = CorruptReport::default();
        for key in self.keys() {
            let records = self.read_uncached(&key).await?;
            for record in records.values() {
                report.scanned += 1;
                let found = problems(record);
                if found.is_empty() {
                    continue;
                }
                for problem in &found {
                    match *problem {
                        "name" => report.missing_name += 1,
                        "originalname" => report.missing_originalname += 1,
                        "tracker_name" => report.missing_tracker += 1,
                        _ => report.empty_search_fields += 1,
                    }
                }
                if report.samples.len() < sample_size {
                    report.samples.push(CorruptSample {
                        key: key.clone(),
                        url: record.url.clone(),
                        problems: found,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Keys whose two halves are identical, e.g. `ponies:ponies`.
    ///
    /// With `tracker`, only shards holding at least one record from that
    /// tracker (case-insensitive) are reported.
    pub async fn find_duplicate_keys(
        &self,
        tracker: Option<&str>,
        exclude_numeric: bool,
    ) -> Result<Vec<String>, StoreError> {
        let policy = DuplicateKeyPolicy { exclude_numeric };
        let mut found = Vec::new();
        for key in self.keys() {
            if !policy.is_self_duplicate(&key) {
                continue;
            }
            if let Some(tracker) = tracker {
                let records = self.read_uncached(&key).await?;
                if !records
                    .values()
                    .any(|r| r.tracker_name.eq_ignore_ascii_case(tracker))
                {
                    continue;
                }
            }
            found.push(key);
        }
        Ok(found)
    }

    /// Empty a shard.
    ///
    /// Without a target every record is deleted. With `(name, originalname)`
    /// every record is renamed and moved to the key those names produce.
    pub async fn remove_bucket(
        &self,
        key: &str,
        migrate_to: Option<(&str, &str)>,
    ) -> Result<RemoveBucketReport, StoreError> {
        let mut report = RemoveBucketReport::default();

        let Some((name, originalname)) = migrate_to else {
            {
                let mut shard = self.open_write(key).await?;
                report.removed = shard.len();
                shard.records_mut().clear();
            }
            self.remove_empty_shard(key).await?;
            info!(key = %key, removed = report.removed, "Removed shard");
            return Ok(report);
        };

        let new_key = self
            .bucket_key(name, originalname)
            .ok_or_else(|| StoreError::InvalidKey(format!("{}:{}", name, originalname)))?;
        if new_key == key {
            return Err(StoreError::SameKey(new_key));
        }

        let records = self.open_read(key).await?;
        for record in records.values() {
            let mut renamed = record.clone();
            renamed.name = name.to_string();
            renamed.originalname = originalname.to_string();
            self.migrate_to_new_key(key, renamed, &new_key).await?;
            report.migrated += 1;
        }
        self.remove_empty_shard(key).await?;

        info!(from = %key, to = %new_key, migrated = report.migrated, "Moved shard");
        report.new_key = Some(new_key);
        Ok(report)
    }
}
