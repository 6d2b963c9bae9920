use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;
use trackerdb_core::{MergeStats, TorrentRecord, UpsertDecider};

use super::error::{bad_request, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub records: Vec<TorrentRecord>,
}

/// POST /api/v1/ingest
///
/// Merge a scraped batch. A known url is replaced, a new one is added.
/// Per-record failures are counted, never fatal to the batch.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<MergeStats> {
    if request.records.is_empty() {
        return Err(bad_request("records must not be empty"));
    }

    let count = request.records.len();
    let stats = state
        .store()
        .add_or_update(request.records, &UpsertDecider)
        .await;

    info!(
        count,
        added = stats.added,
        updated = stats.updated,
        skipped = stats.skipped,
        failed = stats.failed,
        "Ingested batch"
    );

    Ok(Json(stats))
}
