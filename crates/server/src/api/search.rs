//! Search over the published snapshot.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;
use trackerdb_core::{SearchHit, SearchQuery};

use super::error::{bad_request, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    /// Snapshot generation the results come from.
    pub generation: u64,
    pub total: usize,
    pub results: Vec<SearchHit>,
}

/// GET /api/v1/search
///
/// Results reflect the last snapshot rebuild, not writes made since.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    if query.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let snapshot = state.fastdb().current();
    let results = snapshot.search(
        state.store().normalizer(),
        &query,
        &state.config().store.duplicates,
    );

    Ok(Json(SearchResponse {
        generation: snapshot.generation(),
        total: results.len(),
        results,
    }))
}
