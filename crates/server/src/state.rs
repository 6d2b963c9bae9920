use std::sync::Arc;
use trackerdb_core::{BucketStore, Config, FastDb, SanitizedConfig, StoreCron};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<BucketStore>,
    fastdb: Arc<FastDb>,
    cron: Arc<StoreCron>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<BucketStore>,
        fastdb: Arc<FastDb>,
        cron: Arc<StoreCron>,
    ) -> Self {
        Self {
            config,
            store,
            fastdb,
            cron,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &BucketStore {
        self.store.as_ref()
    }

    pub fn fastdb(&self) -> &FastDb {
        self.fastdb.as_ref()
    }

    pub fn cron(&self) -> &StoreCron {
        self.cron.as_ref()
    }
}
