//! End-to-end properties of the bucket store.
//!
//! Each test opens its own store in a temp directory; nothing is shared
//! between tests.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use trackerdb_core::{
    bucket_key,
    testing::{fixtures, RecordingDecider},
    BucketStore, Decision, Normalizer, TorrentRecord, UpsertDecider,
};

struct TestHarness {
    store: Arc<BucketStore>,
    dir: TempDir,
}

impl TestHarness {
    async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = Self::open_at(&dir).await;
        Self { store, dir }
    }

    async fn open_at(dir: &TempDir) -> Arc<BucketStore> {
        Arc::new(
            BucketStore::open(fixtures::store_config(dir.path()))
                .await
                .expect("Failed to open store"),
        )
    }

    /// A second store over the same directory, as another process would see it.
    async fn reopen(&self) -> Arc<BucketStore> {
        Self::open_at(&self.dir).await
    }

    fn shard_bytes(&self, key: &str) -> Vec<u8> {
        std::fs::read(self.store.layout().path_for(key)).expect("shard file should exist")
    }
}

#[test]
fn test_bucket_key_is_deterministic() {
    let normalizer = Normalizer::default();
    let expected = bucket_key(&normalizer, "Интерстеллар", "Interstellar").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            std::thread::spawn(move || {
                (0..100)
                    .map(|_| bucket_key(&normalizer, "Интерстеллар", "Interstellar"))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    for handle in handles {
        for key in handle.join().unwrap() {
            assert_eq!(key.as_deref(), Some(expected.as_str()));
        }
    }
    assert_eq!(expected, "интерстеллар:interstellar");
}

#[tokio::test]
async fn test_repeated_merge_leaves_shard_file_identical() {
    let h = TestHarness::new().await;
    let batch = vec![
        fixtures::record("http://t/1", "Dune", "Dune").with_peers(10, 2),
        fixtures::record("http://t/2", "Dune", "Dune").with_peers(3, 0),
    ];

    let first = h.store.add_or_update(batch.clone(), &UpsertDecider).await;
    assert_eq!(first.added, 2);
    h.store.flush().await;
    let before = h.shard_bytes("dune:dune");

    let second = h.store.add_or_update(batch, &UpsertDecider).await;
    assert_eq!(second.skipped, 2);
    assert_eq!(second.added + second.updated, 0);
    let flushed = h.store.flush().await;
    assert_eq!(flushed.written, 0);

    assert_eq!(h.shard_bytes("dune:dune"), before);
}

#[tokio::test]
async fn test_concurrent_batches_on_disjoint_shards_lose_nothing() {
    let h = TestHarness::new().await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&h.store);
            tokio::spawn(async move {
                let batch = fixtures::distinct_records(&format!("batch{}", i), 25);
                store.add_or_update(batch, &UpsertDecider).await
            })
        })
        .collect();
    for task in tasks {
        let stats = task.await.unwrap();
        assert_eq!(stats.added, 25);
        assert_eq!(stats.failed, 0);
    }

    assert_eq!(h.store.keys().len(), 200);
    h.store.flush().await;

    let reopened = h.reopen().await;
    assert_eq!(reopened.keys().len(), 200);
    for i in 0..8 {
        for record in fixtures::distinct_records(&format!("batch{}", i), 25) {
            let key = reopened
                .bucket_key(&record.name, &record.originalname)
                .unwrap();
            let shard = reopened.open_read(&key).await.unwrap();
            assert!(shard.contains_key(&record.url), "{} missing", record.url);
        }
    }
}

#[tokio::test]
async fn test_same_shard_writers_never_interleave() {
    let h = TestHarness::new().await;
    let decider = RecordingDecider::new().with_delay(Duration::from_millis(5));

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let store = Arc::clone(&h.store);
            let decider = decider.clone();
            tokio::spawn(async move {
                let batch: Vec<TorrentRecord> = (0..5)
                    .map(|j| {
                        fixtures::record(&format!("http://t/{}/{}", i, j), "Dune", "Dune")
                    })
                    .collect();
                store.add_or_update(batch, &decider).await
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().added, 5);
    }

    assert_eq!(decider.call_count(), 20);
    assert_eq!(decider.max_active_per_key(), 1);
    assert_eq!(h.store.open_read("dune:dune").await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_decider_sees_only_committed_state_of_its_shard() {
    let h = TestHarness::new().await;
    let decider = RecordingDecider::new();

    h.store
        .add_or_update(
            vec![fixtures::record("http://t/1", "Dune", "Dune")],
            &decider,
        )
        .await;
    h.store
        .add_or_update(
            vec![
                fixtures::record("http://t/1", "Dune", "Dune").with_peers(9, 9),
                fixtures::record("http://t/2", "Dune", "Dune"),
            ],
            &decider,
        )
        .await;

    let calls = decider.calls();
    assert_eq!(calls.len(), 3);
    assert!(!calls[0].existed);
    assert!(calls[1].existed);
    assert_eq!(calls[1].decision, Decision::Update);
    assert!(!calls[2].existed);
}

#[tokio::test]
async fn test_migration_places_record_in_exactly_one_shard() {
    let h = TestHarness::new().await;
    h.store
        .add_or_update(
            vec![
                fixtures::record("http://t/1", "Ponies", "Ponies"),
                fixtures::record("http://t/2", "Ponies", "Ponies"),
            ],
            &UpsertDecider,
        )
        .await;
    h.store.flush().await;

    let mut fixed = h
        .store
        .open_read("ponies:ponies")
        .await
        .unwrap()
        .get("http://t/1")
        .cloned()
        .unwrap();
    fixed.name = "Пони".to_string();
    let new_key = fixed.bucket_key(h.store.normalizer()).unwrap();
    h.store
        .migrate_to_new_key("ponies:ponies", fixed, &new_key)
        .await
        .unwrap();

    let in_old = h.store.open_read("ponies:ponies").await.unwrap();
    let in_new = h.store.open_read(&new_key).await.unwrap();
    assert!(!in_old.contains_key("http://t/1"));
    assert!(in_old.contains_key("http://t/2"));
    assert!(in_new.contains_key("http://t/1"));

    // and the same holds for what reached the disk
    h.store.flush().await;
    let reopened = h.reopen().await;
    assert!(!reopened
        .open_read("ponies:ponies")
        .await
        .unwrap()
        .contains_key("http://t/1"));
    assert!(reopened
        .open_read(&new_key)
        .await
        .unwrap()
        .contains_key("http://t/1"));
}

#[tokio::test]
async fn test_stale_cached_copy_is_not_served_after_flush() {
    let h = TestHarness::new().await;
    h.store
        .add_or_update(
            vec![fixtures::record("http://t/1", "Dune", "Dune")],
            &UpsertDecider,
        )
        .await;
    h.store.flush().await;

    // reader process caches the shard
    let reader = h.reopen().await;
    assert_eq!(reader.open_read("dune:dune").await.unwrap().len(), 1);

    // writer process changes it and flushes
    let writer = h.reopen().await;
    writer
        .add_or_update(
            vec![fixtures::record("http://t/2", "Dune", "Dune")],
            &UpsertDecider,
        )
        .await;
    writer.flush().await;

    reader.rescan_index().await.unwrap();
    let fresh = reader.open_read("dune:dune").await.unwrap();
    assert_eq!(fresh.len(), 2);
    assert!(fresh.contains_key("http://t/2"));
}

#[tokio::test]
async fn test_interstellar_variants_share_one_shard() {
    let h = TestHarness::new().await;
    let stats = h
        .store
        .add_or_update(
            vec![
                fixtures::record_from("x", "http://t/1", "Interstellar", "Interstellar"),
                fixtures::record_from("y", "http://t/2", "interstellar ", "INTERSTELLAR"),
            ],
            &UpsertDecider,
        )
        .await;
    assert_eq!(stats.added, 2);

    assert_eq!(h.store.keys(), vec!["interstellar:interstellar"]);
    let shard = h.store.open_read("interstellar:interstellar").await.unwrap();
    assert_eq!(shard.len(), 2);
    assert_eq!(shard.get("http://t/1").unwrap().tracker_name, "x");
    assert_eq!(shard.get("http://t/2").unwrap().tracker_name, "y");
}

#[tokio::test]
async fn test_empty_names_are_rejected_without_a_shard() {
    let h = TestHarness::new().await;
    let decider = RecordingDecider::new();
    let stats = h
        .store
        .add_or_update(vec![fixtures::record("http://t/1", "", "")], &decider)
        .await;

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total(), 1);
    assert_eq!(decider.call_count(), 0);
    assert!(h.store.keys().is_empty());

    h.store.flush().await;
    assert!(h.store.layout().list_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reopen_rebuilds_index_from_disk() {
    let h = TestHarness::new().await;
    h.store
        .add_or_update(fixtures::distinct_records("r", 10), &UpsertDecider)
        .await;
    h.store.flush().await;

    let reopened = h.reopen().await;
    assert_eq!(reopened.keys(), h.store.keys());
    assert_eq!(reopened.stats().shards, 10);
    assert_eq!(reopened.stats().dirty, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_removed_shard_stays_removed_under_concurrent_flush() {
    let h = TestHarness::new().await;
    let path = h.store.layout().path_for("dune:dune");

    for round in 0..5 {
        {
            let mut shard = h.store.open_write("dune:dune").await.unwrap();
            for i in 0..20_000 {
                shard.insert(fixtures::record(
                    &format!("http://t/{}/{}", round, i),
                    "Dune",
                    "Dune",
                ));
            }
        }

        let store = Arc::clone(&h.store);
        let flush = tokio::spawn(async move { store.flush().await });
        let report = h.store.remove_bucket("dune:dune", None).await.unwrap();
        assert_eq!(report.removed, 20_000);
        flush.await.unwrap();
        h.store.flush().await;

        assert!(h.store.keys().is_empty(), "round {}", round);
        assert!(h.store.index().get("dune:dune").is_none());
        assert!(h.store.open_read("dune:dune").await.unwrap().is_empty());
        assert!(!path.exists(), "round {}", round);
    }

    let reopened = h.reopen().await;
    assert!(reopened.keys().is_empty());
}
