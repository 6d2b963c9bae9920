//! Hooks for the external metadata prober.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use trackerdb_core::{collect_metadata_candidates, MetadataCandidate, MetadataWindow};

use super::error::{store_error, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CandidatesRequest {
    #[serde(flatten)]
    pub window: MetadataWindow,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_max_attempts() -> u8 {
    3
}

fn default_limit() -> usize {
    500
}

#[derive(Debug, Serialize)]
pub struct CandidatesResponse {
    /// Candidates before `limit` was applied.
    pub total: usize,
    pub candidates: Vec<MetadataCandidate>,
}

#[derive(Debug, Deserialize)]
pub struct RecordMetadataRequest {
    pub key: String,
    pub url: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct AttemptRequest {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct AttemptResponse {
    pub attempts: u8,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// POST /api/v1/metadata/candidates
pub async fn candidates(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CandidatesRequest>,
) -> Json<CandidatesResponse> {
    let mut candidates = collect_metadata_candidates(
        state.store(),
        request.window,
        Utc::now(),
        request.max_attempts,
    )
    .await;
    let total = candidates.len();
    candidates.truncate(request.limit);
    Json(CandidatesResponse { total, candidates })
}

/// POST /api/v1/metadata/record
pub async fn record(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecordMetadataRequest>,
) -> ApiResult<OkResponse> {
    state
        .store()
        .record_metadata(&request.key, &request.url, request.metadata)
        .await
        .map_err(store_error)?;
    Ok(Json(OkResponse { ok: true }))
}

/// POST /api/v1/metadata/attempt
pub async fn attempt(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AttemptRequest>,
) -> ApiResult<AttemptResponse> {
    let attempts = state
        .store()
        .bump_metadata_attempts(&request.key, &request.url)
        .await
        .map_err(store_error)?;
    Ok(Json(AttemptResponse { attempts }))
}
