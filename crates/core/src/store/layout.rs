//! On-disk shard layout.
//!
//! A shard lives at `<root>/<h0h1>/<h2h3>/.../<sha256(key)>`, one directory
//! level per configured fan-out step. The file has two lines: a small JSON
//! header (enough to rebuild the master index without parsing records) and
//! the JSON `url -> record` map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use super::{ShardMap, StoreError};
use crate::record::TorrentRecord;

/// Current shard file format.
pub const SHARD_FORMAT_VERSION: u32 = 1;

const TMP_EXTENSION: &str = "tmp";

/// Headers are tiny; a longer first line is not one of ours.
const MAX_HEADER_BYTES: u64 = 64 * 1024;

/// First line of every shard file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardHeader {
    pub key: String,
    pub version: u32,
    /// Identity token of this write; strictly increasing per store.
    pub file_time: i64,
    pub updated_at: DateTime<Utc>,
}

/// Maps shard keys to file paths.
#[derive(Debug, Clone)]
pub struct ShardLayout {
    root: PathBuf,
    levels: u8,
}

impl ShardLayout {
    pub fn new(root: impl Into<PathBuf>, levels: u8) -> Self {
        Self {
            root: root.into(),
            levels,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let hash = format!("{:x}", Sha256::digest(key.as_bytes()));
        let mut path = self.root.clone();
        for level in 0..self.levels as usize {
            path.push(&hash[level * 2..level * 2 + 2]);
        }
        path.push(hash);
        path
    }

    /// Every shard file under the root. Temp files are skipped.
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(&dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && !is_temp(&path) {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

fn is_temp(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == TMP_EXTENSION)
}

/// Serialize a shard into its file form.
pub fn encode_shard(header: &ShardHeader, records: &ShardMap) -> Result<Vec<u8>, StoreError> {
    let mut out = serde_json::to_vec(header)?;
    out.push(b'\n');
    serde_json::to_writer(&mut out, records)?;
    out.push(b'\n');
    Ok(out)
}

/// A parsed shard file.
#[derive(Debug)]
pub struct DecodedShard {
    pub header: ShardHeader,
    pub records: ShardMap,
    /// Map keys of entries that did not parse as records and were left out.
    pub dropped: Vec<String>,
}

/// Parse a whole shard file. The error string says what was wrong with it.
///
/// Entries are decoded one by one; a bad entry is reported in `dropped`
/// and the rest of the shard survives.
pub fn decode_shard(bytes: &[u8]) -> Result<DecodedShard, String> {
    let split = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| "missing header line".to_string())?;
    let header: ShardHeader = serde_json::from_slice(&bytes[..split])
        .map_err(|e| format!("bad header: {}", e))?;
    if header.version != SHARD_FORMAT_VERSION {
        return Err(format!("unsupported shard version {}", header.version));
    }
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&bytes[split + 1..])
        .map_err(|e| format!("bad records: {}", e))?;

    let mut records = ShardMap::new();
    let mut dropped = Vec::new();
    for (url, value) in raw {
        match serde_json::from_value::<TorrentRecord>(value) {
            Ok(record) if !record.url.is_empty() => {
                records.insert(record.url.clone(), record);
            }
            _ => dropped.push(url),
        }
    }
    Ok(DecodedShard {
        header,
        records,
        dropped,
    })
}

/// Read only the header line of a shard file.
pub async fn read_header(path: &Path) -> Result<ShardHeader, StoreError> {
    let file = fs::File::open(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    let mut reader = BufReader::new(file).take(MAX_HEADER_BYTES);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    serde_json::from_str(line.trim_end()).map_err(StoreError::from)
}

/// Write `bytes` to `path` through a temp file and rename, so readers only
/// ever see a complete shard.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp = path.with_extension(TMP_EXTENSION);
    fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

/// Delete a shard file. A file that is already gone is not an error.
pub async fn remove_file(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(path, e)),
    }
}
