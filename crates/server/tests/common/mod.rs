//! Common test utilities for in-process API testing.
//!
//! The fixture opens a real store in a temp directory and drives the router
//! with `tower::ServiceExt::oneshot`, so no port is bound.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use trackerdb_core::{BucketStore, Config, FastDb, StoreCron, TorrentRecord};
use trackerdb_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use trackerdb_core::testing::fixtures;

/// In-process server over a throwaway store.
///
/// The background loops are not started; tests rebuild the snapshot
/// through the admin endpoint when they need search results.
pub struct TestFixture {
    pub router: Router,
    pub state: Arc<AppState>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a fixture after letting `tweak` adjust the config.
    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config {
            store: fixtures::store_config(&temp_dir.path().join("fdb")),
            ..Default::default()
        };
        tweak(&mut config);

        let store = Arc::new(
            BucketStore::open(config.store.clone())
                .await
                .expect("Failed to open store"),
        );
        let fastdb = Arc::new(FastDb::new());
        let cron = Arc::new(StoreCron::new(
            Arc::clone(&store),
            Arc::clone(&fastdb),
            config.persistence.clone(),
            config.snapshot.clone(),
        ));

        let state = Arc::new(AppState::new(config, store, fastdb, cron));
        let router = create_router(Arc::clone(&state));

        Self {
            router,
            state,
            temp_dir,
        }
    }

    /// Ingest records and assert the request succeeded.
    pub async fn ingest(&self, records: Vec<TorrentRecord>) -> Value {
        let response = self
            .post("/api/v1/ingest", json!({ "records": records }))
            .await;
        assert_eq!(response.status, StatusCode::OK, "ingest failed: {}", response.body);
        response.body
    }

    /// Rebuild the search snapshot from the store.
    pub async fn rebuild(&self) -> Value {
        let response = self.post("/api/v1/admin/snapshot/rebuild", json!({})).await;
        assert_eq!(response.status, StatusCode::OK);
        response.body
    }

    /// Send a GET request.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        TestResponse { status, body }
    }
}

/// Assert a response status, printing the body on mismatch.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
