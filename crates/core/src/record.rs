//! The release record stored in every shard.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::key::bucket_key;
use crate::normalize::Normalizer;

static BTIH_HEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)btih:([a-f0-9]{40})").expect("static regex"));

// matched against lowercased input; case folding here is ASCII-only
static SIZE_DISPLAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9.,]+) (mb|мб|gb|гб|tb|тб)").expect("static regex"));

const MIB: f64 = 1024.0 * 1024.0;

/// Bytes described by a tracker size label such as `"1.46 GB"` or `"700,5 МБ"`.
///
/// A comma is a decimal separator. Labels without a recognised unit, or
/// with a zero amount, give `None`.
pub fn parse_size_display(display: &str) -> Option<u64> {
    let lowered = display.to_lowercase();
    let caps = SIZE_DISPLAY.captures(&lowered)?;
    let amount: f64 = caps[1].replace(',', ".").parse().ok()?;
    if !amount.is_finite() || amount <= 0.0 {
        return None;
    }
    let mebibytes = match &caps[2] {
        "gb" | "гб" => amount * 1024.0,
        "tb" | "тб" => amount * MIB,
        _ => amount,
    };
    Some((mebibytes * MIB) as u64)
}

/// One tracker release. `url` is its key inside the shard that holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentRecord {
    pub url: String,
    pub tracker_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub originalname: String,
    /// Normalized `name`. Derived, recomputed on every write.
    #[serde(default)]
    pub search_name: String,
    /// Normalized `originalname`. Derived, recomputed on every write.
    #[serde(default)]
    pub search_originalname: String,
    /// Category tags ("movie", "serial", "anime", ...).
    #[serde(default)]
    pub types: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnet: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_display: Option<String>,
    #[serde(default)]
    pub seeders: u32,
    #[serde(default)]
    pub leechers: u32,
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
    #[serde(default)]
    pub check_time: DateTime<Utc>,
    /// 0 = unknown.
    #[serde(default)]
    pub release_year: u16,
    /// Vertical resolution (720, 1080, 2160), 0 = unknown.
    #[serde(default)]
    pub quality: u16,
    /// Written back by the external metadata pipeline, never by the merge engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata_attempts: u8,
}

impl TorrentRecord {
    /// A fresh candidate as a scraper would produce it.
    pub fn new(
        url: impl Into<String>,
        tracker_name: impl Into<String>,
        title: impl Into<String>,
        name: impl Into<String>,
        originalname: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            url: url.into(),
            tracker_name: tracker_name.into(),
            title: title.into(),
            name: name.into(),
            originalname: originalname.into(),
            search_name: String::new(),
            search_originalname: String::new(),
            types: BTreeSet::new(),
            magnet: None,
            size_bytes: 0,
            size_display: None,
            seeders: 0,
            leechers: 0,
            create_time: now,
            update_time: now,
            check_time: now,
            release_year: 0,
            quality: 0,
            metadata: None,
            metadata_attempts: 0,
        }
    }

    pub fn with_magnet(mut self, magnet: impl Into<String>) -> Self {
        self.magnet = Some(magnet.into());
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_peers(mut self, seeders: u32, leechers: u32) -> Self {
        self.seeders = seeders;
        self.leechers = leechers;
        self
    }

    pub fn with_size(mut self, size_bytes: u64, display: impl Into<String>) -> Self {
        self.size_bytes = size_bytes;
        self.size_display = Some(display.into());
        self
    }

    pub fn with_release_year(mut self, year: u16) -> Self {
        self.release_year = year;
        self
    }

    /// Recompute the derived search fields from `name`/`originalname`.
    pub fn refresh_search_names(&mut self, normalizer: &Normalizer) {
        self.search_name = normalizer.normalize(&self.name);
        self.search_originalname = normalizer.normalize(&self.originalname);
    }

    /// Fill `size_bytes` from `size_display` when it is unknown. Returns
    /// whether the record changed.
    pub fn fill_size_from_display(&mut self) -> bool {
        if self.size_bytes != 0 {
            return false;
        }
        match self.size_display.as_deref().and_then(parse_size_display) {
            Some(bytes) => {
                self.size_bytes = bytes;
                true
            }
            None => false,
        }
    }

    /// Key of the shard this record belongs in according to its current names.
    pub fn bucket_key(&self, normalizer: &Normalizer) -> Option<String> {
        bucket_key(normalizer, &self.name, &self.originalname)
    }

    /// Lowercase hex info-hash parsed from the magnet link, if any.
    pub fn info_hash(&self) -> Option<String> {
        let magnet = self.magnet.as_deref()?;
        BTIH_HEX
            .captures(magnet)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
    }

    pub fn has_type(&self, tag: &str) -> bool {
        self.types.contains(tag)
    }

    /// Equal in everything a scraper can observe: timestamps, derived search
    /// fields and metadata-pipeline state are ignored.
    pub fn same_content(&self, other: &TorrentRecord) -> bool {
        self.url == other.url
            && self.tracker_name == other.tracker_name
            && self.title == other.title
            && self.name == other.name
            && self.originalname == other.originalname
            && self.types == other.types
            && self.magnet == other.magnet
            && self.size_bytes == other.size_bytes
            && self.size_display == other.size_display
            && self.seeders == other.seeders
            && self.leechers == other.leechers
            && self.release_year == other.release_year
            && self.quality == other.quality
    }
}
