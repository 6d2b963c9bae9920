use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub ingest_log: IngestLogConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    9117
}

/// Bucket store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Root directory holding the shard files.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Directory fan-out depth under `path` (two hex chars per level).
    #[serde(default = "default_path_levels")]
    pub path_levels: u8,
    /// How long `open_write` waits for a busy shard before giving up.
    #[serde(default = "default_write_lock_timeout")]
    pub write_lock_timeout_ms: u64,
    /// Timeout applied to every shard file read or write.
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
    /// Per-candidate budget for the merge decision function.
    #[serde(default = "default_decide_timeout")]
    pub decide_timeout_ms: u64,
    /// Number of shard groups a single merge batch works on at once.
    #[serde(default = "default_merge_concurrency")]
    pub merge_concurrency: usize,
    /// Shard files above this size are treated as corrupt.
    #[serde(default = "default_max_read_file_mb")]
    pub max_read_file_mb: u64,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub duplicates: DuplicatesConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            path_levels: default_path_levels(),
            write_lock_timeout_ms: default_write_lock_timeout(),
            io_timeout_ms: default_io_timeout(),
            decide_timeout_ms: default_decide_timeout(),
            merge_concurrency: default_merge_concurrency(),
            max_read_file_mb: default_max_read_file_mb(),
            cache: CacheConfig::default(),
            duplicates: DuplicatesConfig::default(),
            normalize: NormalizeConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Store config rooted at `path`, everything else default.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn write_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.write_lock_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn decide_timeout(&self) -> Duration {
        Duration::from_millis(self.decide_timeout_ms)
    }

    pub fn max_read_bytes(&self) -> u64 {
        self.max_read_file_mb.saturating_mul(1024 * 1024)
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("Data/fdb")
}

fn default_path_levels() -> u8 {
    2
}

fn default_write_lock_timeout() -> u64 {
    30_000
}

fn default_io_timeout() -> u64 {
    10_000
}

fn default_decide_timeout() -> u64 {
    60_000
}

fn default_merge_concurrency() -> usize {
    4
}

fn default_max_read_file_mb() -> u64 {
    200
}

/// In-memory shard cache policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// When disabled, clean shards are dropped from memory right after a flush.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Clean shards untouched for this long are evicted by the full sweep.
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
    /// Soft cap on cached shards; the sweep evicts down from here.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// How many least-recently-used clean shards one sweep may evict.
    #[serde(default = "default_evict_batch")]
    pub evict_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_minutes: default_ttl_minutes(),
            max_entries: default_max_entries(),
            evict_batch: default_evict_batch(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }
}

fn default_true() -> bool {
    true
}

fn default_ttl_minutes() -> u64 {
    60
}

fn default_max_entries() -> usize {
    2000
}

fn default_evict_batch() -> usize {
    200
}

/// Duplicate handling across shards and at search time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DuplicatesConfig {
    /// Collapse search hits that share a magnet info-hash.
    #[serde(default = "default_true")]
    pub merge_duplicates: bool,
    /// Also collapse hits whose normalized name is purely numeric.
    #[serde(default = "default_true")]
    pub merge_num_duplicates: bool,
    /// Never report numeric `X:X` shard keys as suspicious self-duplicates.
    #[serde(default = "default_true")]
    pub exclude_numeric_self_keys: bool,
}

impl Default for DuplicatesConfig {
    fn default() -> Self {
        Self {
            merge_duplicates: true,
            merge_num_duplicates: true,
            exclude_numeric_self_keys: true,
        }
    }
}

/// Normalizer options. Changing these re-keys the whole store.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NormalizeConfig {
    /// Map Cyrillic letters to Latin before building search tokens.
    #[serde(default)]
    pub transliterate: bool,
}

/// Background persistence loops.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_fast_flush_interval")]
    pub fast_flush_interval_ms: u64,
    #[serde(default = "default_full_sweep_interval")]
    pub full_sweep_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            fast_flush_interval_ms: default_fast_flush_interval(),
            full_sweep_interval_secs: default_full_sweep_interval(),
        }
    }
}

fn default_fast_flush_interval() -> u64 {
    2000
}

fn default_full_sweep_interval() -> u64 {
    60
}

/// Search snapshot rebuild schedule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_rebuild_interval")]
    pub rebuild_interval_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            rebuild_interval_secs: default_rebuild_interval(),
        }
    }
}

fn default_rebuild_interval() -> u64 {
    600
}

/// JSON Lines log of every add/update applied by the merge engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestLogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Keep files for this many days (0 = keep all).
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Total size cap in MB (0 = unlimited).
    #[serde(default)]
    pub max_size_mb: u64,
    /// File count cap (0 = unlimited).
    #[serde(default)]
    pub max_files: usize,
}

impl Default for IngestLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_log_dir(),
            retention_days: default_retention_days(),
            max_size_mb: 0,
            max_files: 0,
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("Data/log")
}

fn default_retention_days() -> u32 {
    7
}

/// Sanitized config for API responses (filesystem locations redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub store: SanitizedStoreConfig,
    pub persistence: PersistenceConfig,
    pub snapshot: SnapshotConfig,
    pub ingest_log: SanitizedIngestLogConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStoreConfig {
    pub path_levels: u8,
    pub write_lock_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub decide_timeout_ms: u64,
    pub merge_concurrency: usize,
    pub max_read_file_mb: u64,
    pub cache: CacheConfig,
    pub duplicates: DuplicatesConfig,
    pub normalize: NormalizeConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedIngestLogConfig {
    pub enabled: bool,
    pub dir_configured: bool,
    pub retention_days: u32,
    pub max_size_mb: u64,
    pub max_files: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let store = &config.store;
        Self {
            server: config.server.clone(),
            store: SanitizedStoreConfig {
                path_levels: store.path_levels,
                write_lock_timeout_ms: store.write_lock_timeout_ms,
                io_timeout_ms: store.io_timeout_ms,
                decide_timeout_ms: store.decide_timeout_ms,
                merge_concurrency: store.merge_concurrency,
                max_read_file_mb: store.max_read_file_mb,
                cache: store.cache.clone(),
                duplicates: store.duplicates.clone(),
                normalize: store.normalize.clone(),
            },
            persistence: config.persistence.clone(),
            snapshot: config.snapshot.clone(),
            ingest_log: SanitizedIngestLogConfig {
                enabled: config.ingest_log.enabled,
                dir_configured: !config.ingest_log.dir.as_os_str().is_empty(),
                retention_days: config.ingest_log.retention_days,
                max_size_mb: config.ingest_log.max_size_mb,
                max_files: config.ingest_log.max_files,
            },
        }
    }
}
