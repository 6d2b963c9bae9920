use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Create a minimal valid config with the store under `store_dir`
fn minimal_config(port: u16, store_dir: &Path) -> String {
    format!(
        r#"
[server]
host = "127.0.0.1"
port = {}

[store]
path = "{}"

[persistence]
fast_flush_interval_ms = 50
"#,
        port,
        store_dir.display()
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Spawn the server and return a handle
async fn spawn_server(config_path: &Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_trackerdb"))
        .env("TRACKERDB_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_health_endpoint() {
    let port = get_available_port();
    let store_dir = TempDir::new().unwrap();
    let config = write_config(&minimal_config(port, store_dir.path()));

    let mut server = spawn_server(config.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let response = Client::new()
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");

    server.kill().await.ok();
}

#[tokio::test]
async fn test_config_endpoint_returns_sanitized() {
    let port = get_available_port();
    let store_dir = TempDir::new().unwrap();
    let config = write_config(&minimal_config(port, store_dir.path()));

    let mut server = spawn_server(config.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let response = Client::new()
        .get(format!("http://127.0.0.1:{}/api/v1/config", port))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["server"]["port"], port);
    assert_eq!(json["persistence"]["fast_flush_interval_ms"], 50);
    assert!(json["store"].get("path").is_none());

    server.kill().await.ok();
}

#[tokio::test]
async fn test_ingested_records_reach_disk() {
    let port = get_available_port();
    let store_dir = TempDir::new().unwrap();
    let config = write_config(&minimal_config(port, store_dir.path()));

    let mut server = spawn_server(config.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/api/v1/ingest", port))
        .json(&json!({
            "records": [{
                "url": "http://t/1",
                "tracker_name": "test",
                "title": "Dune / Dune",
                "name": "Dune",
                "originalname": "Dune",
            }]
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let stats: serde_json::Value = response.json().await.unwrap();
    assert_eq!(stats["added"], 1);

    // The fast flush loop persists the shard without an explicit flush
    let mut persisted = false;
    for _ in 0..60 {
        let sync: serde_json::Value = client
            .get(format!(
                "http://127.0.0.1:{}/api/v1/sync?since=2000-01-01T00:00:00Z",
                port
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if sync["shards"].as_array().is_some_and(|s| s.len() == 1) {
            persisted = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(persisted, "Shard was not flushed in time");

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_trackerdb"))
            .env("TRACKERDB_CONFIG", "/nonexistent/config.toml")
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}

#[tokio::test]
async fn test_invalid_config_exits_with_error() {
    let store_dir = TempDir::new().unwrap();
    let config = write_config(&format!(
        r#"
[server]
port = 0

[store]
path = "{}"
"#,
        store_dir.path().display()
    ));

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_trackerdb"))
            .env("TRACKERDB_CONFIG", config.path())
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}
