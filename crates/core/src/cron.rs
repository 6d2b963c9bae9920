//! Background loops: persistence and snapshot rebuilds.
//!
//! - Fast flush: woken by writers, debounced by `fast_flush_interval_ms`
//! - Full sweep: flush, delete empty shards, evict idle cache entries
//! - Snapshot: eager rebuild at start, then on a timer or on request

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{PersistenceConfig, SnapshotConfig};
use crate::snapshot::FastDb;
use crate::store::BucketStore;

/// Current state of the background loops.
#[derive(Debug, Clone, Serialize)]
pub struct CronStatus {
    pub running: bool,
    pub snapshot_generation: u64,
    pub snapshot_records: usize,
}

/// Owns the store's background tasks.
pub struct StoreCron {
    store: Arc<BucketStore>,
    fastdb: Arc<FastDb>,
    persistence: PersistenceConfig,
    snapshot: SnapshotConfig,

    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    rebuild_notify: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StoreCron {
    pub fn new(
        store: Arc<BucketStore>,
        fastdb: Arc<FastDb>,
        persistence: PersistenceConfig,
        snapshot: SnapshotConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            fastdb,
            persistence,
            snapshot,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            rebuild_notify: Arc::new(Notify::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the loops (spawns background tasks).
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Store cron already running");
            return;
        }

        info!("Starting store cron");
        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_fast_flush_loop());
        tasks.push(self.spawn_full_sweep_loop());
        tasks.push(self.spawn_snapshot_loop());
    }

    /// Stop the loops, wait for them, then flush whatever is still dirty.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Store cron not running");
            return;
        }

        info!("Stopping store cron");
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Store cron task ended abnormally: {}", e);
            }
        }

        let stats = self.store.flush().await;
        info!(
            written = stats.written,
            removed = stats.removed,
            failed = stats.failed,
            "Store cron stopped, final flush done"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Ask the snapshot loop for a rebuild as soon as possible.
    pub fn request_rebuild(&self) {
        self.rebuild_notify.notify_one();
    }

    pub fn status(&self) -> CronStatus {
        let snapshot = self.fastdb.current();
        CronStatus {
            running: self.is_running(),
            snapshot_generation: snapshot.generation(),
            snapshot_records: snapshot.len(),
        }
    }

    fn spawn_fast_flush_loop(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let written = store.flush_notify();
        let debounce = Duration::from_millis(self.persistence.fast_flush_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Fast flush loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = written.notified() => {}
                }
                // let a burst of writes to the same shards coalesce
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(debounce) => {}
                }
                store.flush().await;
            }
            info!("Fast flush loop stopped");
        })
    }

    fn spawn_full_sweep_loop(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let interval = Duration::from_secs(self.persistence.full_sweep_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Full sweep loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        full_sweep(&store).await;
                    }
                }
            }
            info!("Full sweep loop stopped");
        })
    }

    fn spawn_snapshot_loop(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let fastdb = Arc::clone(&self.fastdb);
        let rebuild = Arc::clone(&self.rebuild_notify);
        let interval = Duration::from_secs(self.snapshot.rebuild_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Snapshot loop started");
            fastdb.rebuild(&store).await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                    _ = rebuild.notified() => {
                        debug!("Snapshot rebuild requested");
                    }
                }
                fastdb.rebuild(&store).await;
            }
            info!("Snapshot loop stopped");
        })
    }
}

/// One slow persistence pass.
pub async fn full_sweep(store: &BucketStore) {
    let flushed = store.flush().await;
    let removed = store.remove_empty_shards().await;
    let evicted = store.evict_cache();
    let pruned = store.prune_locks();
    debug!(
        written = flushed.written,
        failed = flushed.failed,
        removed,
        evicted,
        pruned,
        "Full sweep complete"
    );
}
