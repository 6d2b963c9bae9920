use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use super::IngestEvent;

/// Envelope wrapping an ingest event with its time
#[derive(Debug, Clone, Serialize)]
pub struct IngestEventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: IngestEvent,
}

/// Handle for emitting ingest events
///
/// This is cheaply cloneable and can be shared across tasks.
/// Events are sent through a bounded channel to the IngestLogWriter.
#[derive(Clone)]
pub struct IngestLogHandle {
    tx: mpsc::Sender<IngestEventEnvelope>,
}

impl IngestLogHandle {
    pub fn new(tx: mpsc::Sender<IngestEventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event, waiting for channel capacity.
    pub async fn emit(&self, event: IngestEvent) {
        let envelope = IngestEventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit ingest event: {}", e);
        }
    }

    /// Try to emit an event without blocking
    ///
    /// Returns false if the channel is full or closed; the event is dropped.
    pub fn try_emit(&self, event: IngestEvent) -> bool {
        let envelope = IngestEventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropped ingest event: {}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for IngestLogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestLogHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest_log::IngestAction;

    fn event(url: &str) -> IngestEvent {
        IngestEvent {
            action: IngestAction::Added,
            tracker: "rutor".to_string(),
            url: url.to_string(),
            title: "Matrix".to_string(),
            key: "matrix:matrix".to_string(),
            info_hash: None,
        }
    }

    #[tokio::test]
    async fn test_emit_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = IngestLogHandle::new(tx);

        handle.emit(event("http://t/1")).await;

        let envelope = rx.recv().await.expect("Should receive event");
        assert_eq!(envelope.event.url, "http://t/1");
    }

    #[test]
    fn test_try_emit_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = IngestLogHandle::new(tx);

        assert!(handle.try_emit(event("http://t/1")));
        assert!(!handle.try_emit(event("http://t/2")));
    }

    #[test]
    fn test_try_emit_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        let handle = IngestLogHandle::new(tx);
        drop(rx);

        assert!(!handle.try_emit(event("http://t/1")));
    }

    #[test]
    fn test_envelope_serializes_flat() {
        let envelope = IngestEventEnvelope {
            timestamp: Utc::now(),
            event: event("http://t/1"),
        };
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("timestamp").is_some());
        assert_eq!(json["url"], "http://t/1");
        assert_eq!(json["action"], "added");
    }
}
