pub mod config;
pub mod cron;
pub mod ingest_log;
pub mod key;
pub mod merge;
pub mod metadata;
pub mod metrics;
pub mod migrate;
pub mod normalize;
pub mod record;
pub mod repair;
pub mod snapshot;
pub mod store;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use cron::{CronStatus, StoreCron};
pub use ingest_log::{create_file_ingest_log, IngestAction, IngestEvent, IngestLogHandle};
pub use key::{bucket_key, DuplicateKeyPolicy};
pub use merge::{DecideContext, DecideFn, Decision, MergeDecider, MergeStats, UpsertDecider};
pub use metadata::{collect_metadata_candidates, MetadataCandidate, MetadataWindow};
pub use normalize::Normalizer;
pub use record::{parse_size_display, TorrentRecord};
pub use repair::{CheckTimeReport, CorruptReport, RemoveBucketReport, SearchNameReport, SizeReport};
pub use snapshot::{FastDb, SearchHit, SearchQuery, Snapshot};
pub use store::{BucketStore, FlushStats, ShardMap, StoreError, StoreStats};
