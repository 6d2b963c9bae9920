use serde::{Deserialize, Serialize};

use crate::record::TorrentRecord;

/// What the merge engine did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestAction {
    Added,
    Updated,
}

/// One applied add/update, as written to the ingest log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestEvent {
    pub action: IngestAction,
    pub tracker: String,
    pub url: String,
    pub title: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
}

impl IngestEvent {
    pub fn from_record(action: IngestAction, key: &str, record: &TorrentRecord) -> Self {
        Self {
            action,
            tracker: record.tracker_name.clone(),
            url: record.url.clone(),
            title: record.title.clone(),
            key: key.to_string(),
            info_hash: record.info_hash(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_record() {
        let record = TorrentRecord::new("http://t/1", "rutor", "Matrix 1999", "Matrix", "Matrix")
            .with_magnet("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567");
        let event = IngestEvent::from_record(IngestAction::Added, "matrix:matrix", &record);
        assert_eq!(event.tracker, "rutor");
        assert_eq!(event.key, "matrix:matrix");
        assert_eq!(
            event.info_hash.as_deref(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""action":"added""#));
    }
}
