//! Shard reads, key prediction and incremental sync.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use trackerdb_core::TorrentRecord;

use super::error::{api_error, bad_request, store_error, ApiResult};
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

fn default_list_limit() -> usize {
    1000
}

#[derive(Debug, Serialize)]
pub struct KeyListResponse {
    pub total: usize,
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BucketResponse {
    pub key: String,
    pub records: Vec<TorrentRecord>,
}

#[derive(Debug, Deserialize)]
pub struct KeyParams {
    pub name: String,
    pub originalname: String,
}

#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    pub since: DateTime<Utc>,
    /// Resume after this key among shards stamped exactly `since`.
    #[serde(default)]
    pub after_key: Option<String>,
    #[serde(default = "default_sync_limit")]
    pub limit: usize,
}

fn default_sync_limit() -> usize {
    200
}

#[derive(Debug, Serialize)]
pub struct SyncShard {
    pub key: String,
    pub updated_at: DateTime<Utc>,
    pub records: Vec<TorrentRecord>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub shards: Vec<SyncShard>,
    /// Pass back as `since` to continue; absent when nothing changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_since: Option<DateTime<Utc>>,
    /// Pass back as `after_key` together with `next_since`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_after_key: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/buckets
pub async fn list_buckets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<KeyListResponse> {
    let keys = state.store().keys();
    let total = keys.len();
    let keys = keys
        .into_iter()
        .skip(params.offset)
        .take(params.limit)
        .collect();
    Json(KeyListResponse { total, keys })
}

/// GET /api/v1/buckets/{key}
pub async fn get_bucket(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<BucketResponse> {
    let records = state.store().open_read(&key).await.map_err(store_error)?;
    if records.is_empty() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Shard not found: {}", key),
        ));
    }
    Ok(Json(BucketResponse {
        key,
        records: records.values().cloned().collect(),
    }))
}

/// GET /api/v1/key
///
/// Predict the shard a release with these names lands in.
pub async fn bucket_key(
    State(state): State<Arc<AppState>>,
    Query(params): Query<KeyParams>,
) -> ApiResult<KeyResponse> {
    state
        .store()
        .bucket_key(&params.name, &params.originalname)
        .map(|key| Json(KeyResponse { key }))
        .ok_or_else(|| bad_request("name and originalname must both contain letters or digits"))
}

/// GET /api/v1/sync
///
/// Shards persisted after the `(since, after_key)` cursor, oldest first,
/// with their records.
pub async fn sync(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SyncParams>,
) -> ApiResult<SyncResponse> {
    let changed = state
        .store()
        .changed_since(params.since, params.after_key.as_deref(), params.limit);
    let next_since = changed.last().map(|(_, entry)| entry.updated_at);
    let next_after_key = changed.last().map(|(key, _)| key.clone());

    let mut shards = Vec::with_capacity(changed.len());
    for (key, entry) in changed {
        match state.store().read_uncached(&key).await {
            Ok(records) => shards.push(SyncShard {
                key,
                updated_at: entry.updated_at,
                records: records.values().cloned().collect(),
            }),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping shard in sync");
            }
        }
    }

    Ok(Json(SyncResponse {
        shards,
        next_since,
        next_after_key,
    }))
}
