use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Fan-out depth stays within what the layout supports
/// - Loop intervals and concurrency are non-zero
/// - An enabled cache has room for at least one shard
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.store.path_levels > 4 {
        return Err(ConfigError::ValidationError(format!(
            "store.path_levels must be between 0 and 4, got {}",
            config.store.path_levels
        )));
    }

    if config.store.merge_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "store.merge_concurrency cannot be 0".to_string(),
        ));
    }

    if config.store.cache.enabled && config.store.cache.max_entries == 0 {
        return Err(ConfigError::ValidationError(
            "store.cache.max_entries cannot be 0 while the cache is enabled".to_string(),
        ));
    }

    if config.persistence.fast_flush_interval_ms == 0
        || config.persistence.full_sweep_interval_secs == 0
    {
        return Err(ConfigError::ValidationError(
            "persistence intervals cannot be 0".to_string(),
        ));
    }

    if config.snapshot.rebuild_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "snapshot.rebuild_interval_secs cannot be 0".to_string(),
        ));
    }

    Ok(())
}
