use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use trackerdb_core::{CronStatus, FlushStats, SanitizedConfig, StoreStats};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub store: StoreStats,
    pub cron: CronStatus,
}

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        store: state.store().stats(),
        cron: state.cron().status(),
    })
}

/// POST /api/v1/flush
///
/// Synchronous persistence pass.
pub async fn flush(State(state): State<Arc<AppState>>) -> Json<FlushStats> {
    Json(state.store().flush().await)
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
