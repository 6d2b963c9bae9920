use tokio::sync::mpsc;

use super::{FileSink, IngestEventEnvelope, IngestLogError, IngestLogHandle, IngestSink};
use crate::config::IngestLogConfig;

/// Background task that receives ingest events and appends them to a sink
pub struct IngestLogWriter {
    rx: mpsc::Receiver<IngestEventEnvelope>,
    sink: Box<dyn IngestSink>,
}

impl IngestLogWriter {
    pub fn new(rx: mpsc::Receiver<IngestEventEnvelope>, sink: Box<dyn IngestSink>) -> Self {
        Self { rx, sink }
    }

    /// Run the writer, consuming events until every handle is dropped
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        tracing::info!("Ingest log writer started");

        while let Some(envelope) = self.rx.recv().await {
            if let Err(e) = self.sink.append(&envelope) {
                tracing::error!("Failed to write ingest event: {}", e);
            }
        }

        tracing::info!("Ingest log writer shutting down");
    }
}

/// Create an ingest log over an arbitrary sink
///
/// Returns:
/// - `IngestLogHandle` - attach to the store with `BucketStore::with_ingest_log`
/// - `IngestLogWriter` - spawn this as a background task with `tokio::spawn(writer.run())`
pub fn create_ingest_log(
    sink: Box<dyn IngestSink>,
    buffer_size: usize,
) -> (IngestLogHandle, IngestLogWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (IngestLogHandle::new(tx), IngestLogWriter::new(rx, sink))
}

/// Create the daily-file ingest log described by `config`.
pub fn create_file_ingest_log(
    config: &IngestLogConfig,
    buffer_size: usize,
) -> Result<(IngestLogHandle, IngestLogWriter), IngestLogError> {
    let sink = FileSink::from_config(config)?;
    Ok(create_ingest_log(Box::new(sink), buffer_size))
}
