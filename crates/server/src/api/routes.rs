use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::middleware::metrics_middleware;
use super::{admin, buckets, handlers, ingest, metadata, search};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, config and stats
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/stats", get(handlers::get_stats))
        // Reads
        .route("/search", get(search::search))
        .route("/key", get(buckets::bucket_key))
        .route("/buckets", get(buckets::list_buckets))
        .route("/buckets/{key}", get(buckets::get_bucket))
        .route("/sync", get(buckets::sync))
        // Writes
        .route("/ingest", post(ingest::ingest))
        .route("/flush", post(handlers::flush))
        // Maintenance
        .route("/admin/snapshot/rebuild", post(admin::rebuild_snapshot))
        .route("/admin/rescan", post(admin::rescan_index))
        .route("/admin/update-search-names", post(admin::update_search_names))
        .route("/admin/update-sizes", post(admin::update_sizes))
        .route("/admin/reset-check-time", post(admin::reset_check_time))
        .route("/admin/corrupt", get(admin::find_corrupt))
        .route("/admin/duplicate-keys", get(admin::find_duplicate_keys))
        .route("/admin/buckets/remove", post(admin::remove_bucket))
        .route("/admin/buckets/{key}/empty", delete(admin::remove_empty_bucket))
        .route("/admin/migrate", post(admin::migrate_record))
        // Metadata prober
        .route("/metadata/candidates", post(metadata::candidates))
        .route("/metadata/record", post(metadata::record))
        .route("/metadata/attempt", post(metadata::attempt))
        .layer(middleware::from_fn(metrics_middleware))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
