//! Maintenance endpoints: snapshot rebuilds, repairs and shard surgery.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use trackerdb_core::{
    CheckTimeReport, CorruptReport, RemoveBucketReport, SearchNameReport, SizeReport, StoreError,
};

use super::error::{bad_request, store_error, ApiResult};
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub generation: u64,
    pub records: usize,
}

#[derive(Debug, Serialize)]
pub struct RescanResponse {
    pub shards: usize,
}

#[derive(Debug, Deserialize)]
pub struct CorruptParams {
    #[serde(default = "default_sample")]
    pub sample: usize,
}

fn default_sample() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct DuplicateKeyParams {
    #[serde(default)]
    pub tracker: Option<String>,
    /// Falls back to `store.duplicates.exclude_numeric_self_keys`.
    #[serde(default)]
    pub exclude_numeric: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct DuplicateKeyResponse {
    pub total: usize,
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveBucketRequest {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub originalname: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MigrateRequest {
    pub key: String,
    pub url: String,
    pub name: String,
    pub originalname: String,
}

#[derive(Debug, Serialize)]
pub struct MigrateResponse {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct RemoveEmptyResponse {
    pub removed: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/admin/snapshot/rebuild
pub async fn rebuild_snapshot(State(state): State<Arc<AppState>>) -> Json<RebuildResponse> {
    let snapshot = state.fastdb().rebuild(state.store()).await;
    Json(RebuildResponse {
        generation: snapshot.generation(),
        records: snapshot.len(),
    })
}

/// POST /api/v1/admin/rescan
///
/// Reload the master index from the shard files on disk.
pub async fn rescan_index(State(state): State<Arc<AppState>>) -> ApiResult<RescanResponse> {
    let shards = state.store().rescan_index().await.map_err(store_error)?;
    Ok(Json(RescanResponse { shards }))
}

/// POST /api/v1/admin/update-search-names
pub async fn update_search_names(
    State(state): State<Arc<AppState>>,
) -> ApiResult<SearchNameReport> {
    let report = state
        .store()
        .update_search_names()
        .await
        .map_err(store_error)?;
    state.cron().request_rebuild();
    Ok(Json(report))
}

/// POST /api/v1/admin/update-sizes
pub async fn update_sizes(State(state): State<Arc<AppState>>) -> ApiResult<SizeReport> {
    let report = state.store().update_sizes().await.map_err(store_error)?;
    if report.updated > 0 {
        state.cron().request_rebuild();
    }
    Ok(Json(report))
}

/// POST /api/v1/admin/reset-check-time
pub async fn reset_check_time(
    State(state): State<Arc<AppState>>,
) -> ApiResult<CheckTimeReport> {
    state
        .store()
        .reset_check_time()
        .await
        .map(Json)
        .map_err(store_error)
}

/// GET /api/v1/admin/corrupt
pub async fn find_corrupt(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CorruptParams>,
) -> ApiResult<CorruptReport> {
    state
        .store()
        .find_corrupt(params.sample)
        .await
        .map(Json)
        .map_err(store_error)
}

/// GET /api/v1/admin/duplicate-keys
pub async fn find_duplicate_keys(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DuplicateKeyParams>,
) -> ApiResult<DuplicateKeyResponse> {
    let exclude_numeric = params
        .exclude_numeric
        .unwrap_or(state.config().store.duplicates.exclude_numeric_self_keys);
    let keys = state
        .store()
        .find_duplicate_keys(params.tracker.as_deref(), exclude_numeric)
        .await
        .map_err(store_error)?;
    Ok(Json(DuplicateKeyResponse {
        total: keys.len(),
        keys,
    }))
}

/// POST /api/v1/admin/buckets/remove
///
/// Deletes the shard's records, or renames them into the shard that
/// `name`/`originalname` produce when both are given.
pub async fn remove_bucket(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemoveBucketRequest>,
) -> ApiResult<RemoveBucketReport> {
    let target = match (&request.name, &request.originalname) {
        (Some(name), Some(originalname)) => Some((name.as_str(), originalname.as_str())),
        (None, None) => None,
        _ => return Err(bad_request("name and originalname must be given together")),
    };

    let report = state
        .store()
        .remove_bucket(&request.key, target)
        .await
        .map_err(store_error)?;

    info!(
        key = %request.key,
        migrated = report.migrated,
        removed = report.removed,
        "Removed bucket"
    );
    state.cron().request_rebuild();
    Ok(Json(report))
}

/// POST /api/v1/admin/migrate
///
/// Rename one record and move it to the shard its new names produce.
pub async fn migrate_record(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MigrateRequest>,
) -> ApiResult<MigrateResponse> {
    let store = state.store();
    let new_key = store
        .bucket_key(&request.name, &request.originalname)
        .ok_or_else(|| bad_request("name and originalname must both contain letters or digits"))?;

    let existing = store.open_read(&request.key).await.map_err(store_error)?;
    let Some(record) = existing.get(&request.url) else {
        return Err(store_error(StoreError::NotFound {
            key: request.key,
            url: request.url,
        }));
    };

    let mut record = record.clone();
    record.name = request.name;
    record.originalname = request.originalname;

    store
        .migrate_to_new_key(&request.key, record, &new_key)
        .await
        .map_err(store_error)?;
    state.cron().request_rebuild();

    Ok(Json(MigrateResponse {
        from: request.key,
        to: new_key,
    }))
}

/// DELETE /api/v1/admin/buckets/{key}/empty
pub async fn remove_empty_bucket(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<RemoveEmptyResponse> {
    let removed = state
        .store()
        .remove_empty_shard(&key)
        .await
        .map_err(store_error)?;
    Ok(Json(RemoveEmptyResponse { removed }))
}
