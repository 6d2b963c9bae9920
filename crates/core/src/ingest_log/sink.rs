use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate};
use thiserror::Error;

use super::IngestEventEnvelope;
use crate::config::IngestLogConfig;

#[derive(Debug, Error)]
pub enum IngestLogError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Destination for ingest events.
pub trait IngestSink: Send {
    fn append(&mut self, envelope: &IngestEventEnvelope) -> Result<(), IngestLogError>;
}

const FILE_PREFIX: &str = "fdb.";
const FILE_SUFFIX: &str = ".log";

/// Name of the log file for `day`.
pub fn log_file_name(day: NaiveDate) -> String {
    format!("{}{}{}", FILE_PREFIX, day.format("%Y-%m-%d"), FILE_SUFFIX)
}

fn parse_log_file_name(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Limits applied to the log directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// 0 = keep all.
    pub retention_days: u32,
    /// 0 = unlimited.
    pub max_files: usize,
    /// 0 = unlimited.
    pub max_size_bytes: u64,
}

impl RetentionPolicy {
    pub fn from_config(config: &IngestLogConfig) -> Self {
        Self {
            retention_days: config.retention_days,
            max_files: config.max_files,
            max_size_bytes: config.max_size_mb.saturating_mul(1024 * 1024),
        }
    }
}

/// Delete old log files in `dir`. Today's file is never deleted.
///
/// Files older than the retention window go first, then the oldest files
/// until both the count and the total size fit. Returns how many were deleted.
pub fn apply_retention(
    dir: &Path,
    policy: &RetentionPolicy,
    today: NaiveDate,
) -> Result<usize, IngestLogError> {
    let io_err = |source| IngestLogError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files: Vec<(NaiveDate, PathBuf, u64)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name();
        let Some(day) = name.to_str().and_then(parse_log_file_name) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push((day, entry.path(), size));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut doomed: Vec<usize> = Vec::new();
    if policy.retention_days > 0 {
        if let Some(cutoff) = today.checked_sub_days(Days::new(policy.retention_days as u64)) {
            doomed.extend(
                files
                    .iter()
                    .enumerate()
                    .filter(|(_, (day, _, _))| *day < cutoff)
                    .map(|(i, _)| i),
            );
        }
    }

    let mut remaining = files.len() - doomed.len();
    let mut total: u64 = files
        .iter()
        .enumerate()
        .filter(|(i, _)| !doomed.contains(i))
        .map(|(_, f)| f.2)
        .sum();

    for (i, (day, _, size)) in files.iter().enumerate() {
        if doomed.contains(&i) || *day >= today {
            continue;
        }
        let too_many = policy.max_files > 0 && remaining > policy.max_files;
        let too_big = policy.max_size_bytes > 0 && total > policy.max_size_bytes;
        if !too_many && !too_big {
            break;
        }
        doomed.push(i);
        remaining -= 1;
        total = total.saturating_sub(*size);
    }

    let mut deleted = 0;
    for i in doomed {
        let path = &files[i].1;
        match fs::remove_file(path) {
            Ok(()) => deleted += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to delete old ingest log"),
        }
    }
    Ok(deleted)
}

/// Appends JSON Lines to one file per UTC day.
pub struct FileSink {
    dir: PathBuf,
    policy: RetentionPolicy,
    current_day: Option<NaiveDate>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>, policy: RetentionPolicy) -> Result<Self, IngestLogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| IngestLogError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            policy,
            current_day: None,
        })
    }

    pub fn from_config(config: &IngestLogConfig) -> Result<Self, IngestLogError> {
        Self::new(&config.dir, RetentionPolicy::from_config(config))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl IngestSink for FileSink {
    fn append(&mut self, envelope: &IngestEventEnvelope) -> Result<(), IngestLogError> {
        let day = envelope.timestamp.date_naive();
        if self.current_day != Some(day) {
            // day change (or first write): prune before opening the new file
            let deleted = apply_retention(&self.dir, &self.policy, day)?;
            if deleted > 0 {
                tracing::info!(deleted, "Pruned old ingest logs");
            }
            self.current_day = Some(day);
        }

        let mut line = serde_json::to_vec(envelope)
            .map_err(|e| IngestLogError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let path = self.dir.join(log_file_name(day));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| IngestLogError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(&line)
            .map_err(|source| IngestLogError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest_log::{IngestAction, IngestEvent};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn touch(dir: &Path, d: &str, bytes: usize) {
        fs::write(dir.join(log_file_name(day(d))), vec![b'x'; bytes]).unwrap();
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_file_name() {
        assert_eq!(log_file_name(day("2024-03-05")), "fdb.2024-03-05.log");
        assert_eq!(parse_log_file_name("fdb.2024-03-05.log"), Some(day("2024-03-05")));
        assert_eq!(parse_log_file_name("other.log"), None);
    }

    #[test]
    fn test_retention_by_age() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "2024-03-01", 10);
        touch(dir.path(), "2024-03-08", 10);
        touch(dir.path(), "2024-03-10", 10);
        fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();

        let policy = RetentionPolicy {
            retention_days: 7,
            ..Default::default()
        };
        let deleted = apply_retention(dir.path(), &policy, day("2024-03-10")).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(
            names(dir.path()),
            vec!["fdb.2024-03-08.log", "fdb.2024-03-10.log", "unrelated.txt"]
        );
    }

    #[test]
    fn test_retention_by_count_and_size() {
        let dir = TempDir::new().unwrap();
        for d in ["2024-03-07", "2024-03-08", "2024-03-09", "2024-03-10"] {
            touch(dir.path(), d, 100);
        }

        let policy = RetentionPolicy {
            max_files: 3,
            ..Default::default()
        };
        assert_eq!(apply_retention(dir.path(), &policy, day("2024-03-10")).unwrap(), 1);
        assert_eq!(names(dir.path()).len(), 3);

        let policy = RetentionPolicy {
            max_size_bytes: 150,
            ..Default::default()
        };
        // today's file is kept even though it alone is close to the cap
        assert_eq!(apply_retention(dir.path(), &policy, day("2024-03-10")).unwrap(), 2);
        assert_eq!(names(dir.path()), vec!["fdb.2024-03-10.log"]);
    }

    #[test]
    fn test_file_sink_appends_lines_per_day() {
        let dir = TempDir::new().unwrap();
        let mut sink = FileSink::new(dir.path(), RetentionPolicy::default()).unwrap();

        let event = IngestEvent {
            action: IngestAction::Updated,
            tracker: "kinozal".to_string(),
            url: "http://t/1".to_string(),
            title: "Matrix".to_string(),
            key: "matrix:matrix".to_string(),
            info_hash: None,
        };
        for ts in [
            Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 1, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 2, 0).unwrap(),
        ] {
            sink.append(&IngestEventEnvelope {
                timestamp: ts,
                event: event.clone(),
            })
            .unwrap();
        }

        assert_eq!(
            names(dir.path()),
            vec!["fdb.2024-03-09.log", "fdb.2024-03-10.log"]
        );
        let content = fs::read_to_string(dir.path().join("fdb.2024-03-10.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["action"], "updated");
        assert_eq!(parsed["tracker"], "kinozal");
    }
}
