use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trackerdb_core::{
    create_file_ingest_log, load_config, validate_config, BucketStore, FastDb, StoreCron,
};
use trackerdb_server::{api::create_router, state::AppState};

/// Buffer size for the ingest log channel
const INGEST_LOG_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("TRACKERDB_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Store path: {:?}", config.store.path);

    let mut store = BucketStore::open(config.store.clone())
        .await
        .with_context(|| format!("Failed to open store at {:?}", config.store.path))?;
    info!(shards = store.index().len(), "Store opened");

    // Optional ingest log
    let writer_handle = if config.ingest_log.enabled {
        let (handle, writer) = create_file_ingest_log(&config.ingest_log, INGEST_LOG_BUFFER_SIZE)
            .context("Failed to create ingest log")?;
        store = store.with_ingest_log(handle);
        info!("Ingest log enabled at {:?}", config.ingest_log.dir);
        Some(tokio::spawn(writer.run()))
    } else {
        None
    };

    let store = Arc::new(store);
    let fastdb = Arc::new(FastDb::new());

    let cron = Arc::new(StoreCron::new(
        Arc::clone(&store),
        Arc::clone(&fastdb),
        config.persistence.clone(),
        config.snapshot.clone(),
    ));
    cron.start();

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(
        config,
        Arc::clone(&store),
        fastdb,
        Arc::clone(&cron),
    ));
    let app = create_router(Arc::clone(&state));

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down");

    // Final flush happens inside stop()
    cron.stop().await;

    // Drop every store handle so the ingest log channel closes
    drop(state);
    drop(cron);
    drop(store);

    if let Some(handle) = writer_handle {
        if let Err(e) = handle.await {
            error!("Ingest log writer task panicked: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
