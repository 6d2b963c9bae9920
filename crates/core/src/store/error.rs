//! Error types for the bucket store.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading or writing shards.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Shard could not be serialized.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Key is empty or not of the form `name:originalname`.
    #[error("Invalid shard key: {0:?}")]
    InvalidKey(String),

    /// Another writer held the shard for longer than the configured timeout.
    #[error("Timed out waiting for the write lock on shard {key}")]
    LockTimeout { key: String },

    /// Filesystem did not answer within the configured timeout.
    #[error("I/O timed out at {path}")]
    IoTimeout { path: PathBuf },

    /// Record is not in the shard it was expected in.
    #[error("Record {url} not found in shard {key}")]
    NotFound { key: String, url: String },

    /// Migration source and target are the same shard.
    #[error("Source and target shard are the same: {0}")]
    SameKey(String),

    /// Shard still holds records.
    #[error("Shard {0} is not empty")]
    NotEmpty(String),
}

impl StoreError {
    /// Creates an I/O error for `path`.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether a later attempt may succeed without any change from the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::IoTimeout { .. } | Self::LockTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(StoreError::LockTimeout { key: "a:b".into() }.is_retryable());
        assert!(StoreError::IoTimeout {
            path: PathBuf::from("/x")
        }
        .is_retryable());
        assert!(!StoreError::InvalidKey(String::new()).is_retryable());
        assert!(!StoreError::SameKey("a:b".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = StoreError::NotFound {
            key: "a:b".into(),
            url: "http://t/1".into(),
        };
        assert_eq!(err.to_string(), "Record http://t/1 not found in shard a:b");
    }
}
