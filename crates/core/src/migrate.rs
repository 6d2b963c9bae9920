//! Moving a record between shards after its names were corrected.

use tracing::{error, info};

use crate::key::is_valid_key;
use crate::record::TorrentRecord;
use crate::store::{BucketStore, StoreError};

impl BucketStore {
    /// Move `record` from `old_key` to `new_key`, keeping its url.
    ///
    /// The record is removed under the old shard's lock, which is released
    /// before the new shard's lock is taken; the two locks are never held
    /// together. A concurrent reader may briefly see the record in neither
    /// shard but never in both. If the insert fails, the record is put back
    /// into the old shard.
    ///
    /// The record as passed in is what lands in `new_key`, with its search
    /// names recomputed, so callers can rename it in the same step.
    pub async fn migrate_to_new_key(
        &self,
        old_key: &str,
        record: TorrentRecord,
        new_key: &str,
    ) -> Result<(), StoreError> {
        for key in [old_key, new_key] {
            if !is_valid_key(key) {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
        }
        if old_key == new_key {
            return Err(StoreError::SameKey(old_key.to_string()));
        }

        {
            let mut old = self.open_write(old_key).await?;
            if old.remove(&record.url).is_none() {
                return Err(StoreError::NotFound {
                    key: old_key.to_string(),
                    url: record.url,
                });
            }
        }

        if let Err(e) = self.insert_migrated(new_key, record.clone()).await {
            error!(
                url = %record.url,
                from = %old_key,
                to = %new_key,
                error = %e,
                "Migration insert failed, restoring record"
            );
            if let Err(restore) = self.insert_migrated(old_key, record).await {
                error!(key = %old_key, error = %restore, "Failed to restore migrated record");
            }
            return Err(e);
        }

        info!(from = %old_key, to = %new_key, "Migrated record");
        Ok(())
    }

    /// Write `record` into `key` with fresh search names.
    pub(crate) async fn insert_migrated(
        &self,
        key: &str,
        mut record: TorrentRecord,
    ) -> Result<(), StoreError> {
        record.refresh_search_names(self.normalizer());
        let mut shard = self.open_write(key).await?;
        shard.insert(record);
        Ok(())
    }
}
