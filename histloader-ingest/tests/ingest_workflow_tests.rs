//! End-to-end ingestion workflow tests against a scripted in-memory store

use async_trait::async_trait;
use chrono::TimeZone;
use chrono::Utc;
use histloader_common::config::IngestConfig;
use histloader_common::{Error, Result};
use histloader_ingest::models::{ItemStatus, SessionSnapshot, SessionStatus};
use histloader_ingest::serializer::{Point, PointBatch, SerializerRegistry};
use histloader_ingest::services::{CreateSessionRequest, Dispatcher, SessionManager};
use histloader_ingest::store::{FileSessionStore, PointStore, PushOutcome};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Scriptable stand-in for the remote time-series store
struct MockPointStore {
    pushes: Mutex<Vec<PointBatch>>,
    fail_push: AtomicBool,
    resolve_calls: AtomicU32,
    /// Attempt number from which resolution succeeds; u32::MAX = never
    resolve_from_attempt: AtomicU32,
}

impl MockPointStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            pushes: Mutex::new(Vec::new()),
            fail_push: AtomicBool::new(false),
            resolve_calls: AtomicU32::new(0),
            resolve_from_attempt: AtomicU32::new(1),
        })
    }

    fn pushed(&self) -> Vec<PointBatch> {
        self.pushes.lock().unwrap().clone()
    }

    fn set_fail_push(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::SeqCst);
    }

    fn set_resolve_from(&self, attempt: u32) {
        self.resolve_from_attempt.store(attempt, Ordering::SeqCst);
    }
}

#[async_trait]
impl PointStore for MockPointStore {
    async fn push_points(&self, points: &[Point]) -> Result<PushOutcome> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(Error::Store("injected push failure".to_string()));
        }
        self.pushes.lock().unwrap().push(points.to_vec());
        Ok(PushOutcome {
            succeeded: points.len() as u64,
            failed: 0,
            errors: Vec::new(),
        })
    }

    async fn resolve_series_id(
        &self,
        metric: &str,
        _tags: &HashMap<String, String>,
        _first_timestamp_ms: i64,
    ) -> Result<Option<String>> {
        let attempt = self.resolve_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= self.resolve_from_attempt.load(Ordering::SeqCst) {
            Ok(Some(format!("series-{}", metric)))
        } else {
            Ok(None)
        }
    }
}

fn test_config(dir: &TempDir) -> IngestConfig {
    IngestConfig {
        chunk_size: 10,
        workers: 2,
        queue_capacity: 8,
        resolver_retries: 6,
        resolver_delay_ms: 0,
        session_store_path: dir.path().join("sessions.json"),
        ..IngestConfig::default()
    }
}

/// Must run inside a tokio runtime; the dispatcher spawns its worker pool
fn build_manager(store: Arc<MockPointStore>, config: &IngestConfig) -> Arc<SessionManager> {
    let registry = Arc::new(SerializerRegistry::with_defaults());
    let dispatcher = Dispatcher::new(store, registry, config);
    let session_store = Arc::new(FileSessionStore::new(config.session_store_path.clone()));
    SessionManager::new(dispatcher, session_store)
}

fn request(root: &Path, dataset: &str) -> CreateSessionRequest {
    CreateSessionRequest {
        dataset: dataset.to_string(),
        description: String::new(),
        root_path: root.to_path_buf(),
        path_pattern: r"(?P<site>[^/]+)/(?P<metric>[^/]+)\.csv".to_string(),
        func_id_pattern: "${site}.${metric}".to_string(),
        serializer: None,
        importer: None,
    }
}

fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Epoch-millis CSV with `n` one-second-apart data lines
fn epoch_csv(n: usize) -> String {
    let mut content = String::from("timestamp;value\n");
    for i in 0..n {
        content.push_str(&format!("{};{}.5\n", 1_700_000_000_000u64 + i as u64 * 1000, i));
    }
    content
}

async fn wait_until<F>(
    manager: &Arc<SessionManager>,
    session_id: Uuid,
    what: &str,
    mut predicate: F,
) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    for _ in 0..500 {
        let snapshot = manager.get(session_id).await.unwrap();
        if predicate(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never reached state: {}", session_id, what);
}

async fn wait_completed(manager: &Arc<SessionManager>, session_id: Uuid) -> SessionSnapshot {
    wait_until(manager, session_id, "COMPLETED", |s| {
        s.status == SessionStatus::Completed
    })
    .await
}

#[tokio::test]
async fn imports_matching_files_end_to_end() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    write_file(&root, "plant-a/temperature.csv", &epoch_csv(3));
    write_file(&root, "plant-a/readme.txt", "not a data file\n");

    let store = MockPointStore::new();
    let manager = build_manager(store.clone(), &test_config(&dir));

    let session_id = manager.create(request(&root, "plant-a")).await.unwrap();
    let snapshot = wait_completed(&manager, session_id).await;

    assert_eq!(snapshot.to_import.len(), 0);
    assert_eq!(snapshot.imported.len(), 1);
    assert_eq!(snapshot.in_error.len(), 0);

    let item = &snapshot.imported[0];
    assert_eq!(item.status, ItemStatus::Imported);
    assert_eq!(item.metric, "temperature");
    assert_eq!(item.tags.get("site").map(String::as_str), Some("plant-a"));
    assert_eq!(item.functional_id, "plant-a.temperature");
    assert_eq!(item.points_read, 3);
    assert_eq!(item.points_succeeded, 3);
    assert_eq!(item.points_failed, 0);
    assert_eq!(item.store_id.as_deref(), Some("series-temperature"));
    assert_eq!(
        item.series_start,
        Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
    );
    assert_eq!(
        item.series_end,
        Some(Utc.timestamp_millis_opt(1_700_000_002_000).unwrap())
    );

    let pushes = store.pushed();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].len(), 3);
    assert_eq!(pushes[0][0].metric, "temperature");

    assert_eq!(snapshot.stats.items_initial, 1);
    assert_eq!(snapshot.stats.lifetime.sent, 3);
    assert_eq!(snapshot.stats.runs.len(), 1);
    let run = snapshot.stats.current_run().unwrap();
    assert_eq!(run.items_completed, 1);
    assert_eq!(run.points.succeeded, 3);
    assert!(run.ended_at.is_some());
}

#[tokio::test]
async fn chunking_splits_pushes_by_chunk_size() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    write_file(&root, "plant-a/pressure.csv", &epoch_csv(25));

    let store = MockPointStore::new();
    let manager = build_manager(store.clone(), &test_config(&dir));

    let session_id = manager.create(request(&root, "plant-a")).await.unwrap();
    let snapshot = wait_completed(&manager, session_id).await;

    assert_eq!(snapshot.imported.len(), 1);
    assert_eq!(snapshot.imported[0].points_read, 25);

    let sizes: Vec<usize> = store.pushed().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
}

#[tokio::test]
async fn header_only_file_is_cancelled_not_errored() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    write_file(&root, "plant-a/humidity.csv", "timestamp;value\n");

    let store = MockPointStore::new();
    let manager = build_manager(store.clone(), &test_config(&dir));

    let session_id = manager.create(request(&root, "plant-a")).await.unwrap();
    let snapshot = wait_completed(&manager, session_id).await;

    assert_eq!(snapshot.in_error.len(), 1);
    let item = &snapshot.in_error[0];
    assert_eq!(item.status, ItemStatus::Cancelled);
    assert_eq!(item.points_read, 0);
    assert!(item.errors.iter().any(|e| e.message.contains("no data")));
    assert!(store.pushed().is_empty());

    // a plain restart skips cancelled items and opens no new run
    let moved = manager.restart(session_id, false).await.unwrap();
    assert_eq!(moved, 0);
    let snapshot = manager.get(session_id).await.unwrap();
    assert_eq!(snapshot.stats.runs.len(), 1);
}

#[tokio::test]
async fn unresolved_identifier_errors_after_all_retries() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    write_file(&root, "plant-a/flow.csv", &epoch_csv(3));

    let store = MockPointStore::new();
    store.set_resolve_from(u32::MAX);
    let manager = build_manager(store.clone(), &test_config(&dir));

    let session_id = manager.create(request(&root, "plant-a")).await.unwrap();
    let snapshot = wait_completed(&manager, session_id).await;

    assert_eq!(snapshot.in_error.len(), 1);
    let item = &snapshot.in_error[0];
    assert_eq!(item.status, ItemStatus::Error);
    // the points were pushed before resolution gave up
    assert_eq!(item.points_succeeded, 3);
    assert!(item
        .errors
        .iter()
        .any(|e| e.message.contains("identifier resolution")));
    // the parsed series range is kept even though resolution failed
    assert_eq!(
        item.series_start,
        Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
    );
    assert_eq!(
        item.series_end,
        Some(Utc.timestamp_millis_opt(1_700_000_002_000).unwrap())
    );

    // one initial attempt plus six retries
    assert_eq!(store.resolve_calls.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn unknown_importer_is_rejected() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    write_file(&root, "plant-a/temperature.csv", &epoch_csv(1));

    let store = MockPointStore::new();
    let manager = build_manager(store, &test_config(&dir));

    let mut bad = request(&root, "plant-a");
    bad.importer = Some("parquet".to_string());
    let result = manager.create(bad).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn duplicate_create_returns_existing_session() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    write_file(&root, "plant-a/temperature.csv", &epoch_csv(2));

    let store = MockPointStore::new();
    let manager = build_manager(store.clone(), &test_config(&dir));

    let first = manager.create(request(&root, "plant-a")).await.unwrap();
    wait_completed(&manager, first).await;

    let second = manager.create(request(&root, "plant-a")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(manager.list().await.len(), 1);
}

#[tokio::test]
async fn restart_requeues_error_items_and_imports_them() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    write_file(&root, "plant-a/level.csv", &epoch_csv(4));

    let store = MockPointStore::new();
    store.set_fail_push(true);
    let manager = build_manager(store.clone(), &test_config(&dir));

    let session_id = manager.create(request(&root, "plant-a")).await.unwrap();
    let snapshot = wait_completed(&manager, session_id).await;
    assert_eq!(snapshot.in_error.len(), 1);
    assert_eq!(snapshot.in_error[0].status, ItemStatus::Error);

    store.set_fail_push(false);
    let moved = manager.restart(session_id, false).await.unwrap();
    assert_eq!(moved, 1);

    let snapshot = wait_until(&manager, session_id, "second run completed", |s| {
        s.stats.runs.len() == 2 && s.stats.runs[1].ended_at.is_some()
    })
    .await;

    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.imported.len(), 1);
    let item = &snapshot.imported[0];
    assert_eq!(item.status, ItemStatus::Imported);
    assert_eq!(item.points_read, 4);
    assert_eq!(item.points_succeeded, 4);
    // the error log survives the restart
    assert!(!item.errors.is_empty());

    // counters of the second run reflect only the second attempt
    assert_eq!(snapshot.stats.runs[1].points.succeeded, 4);
}

#[tokio::test]
async fn restart_is_observable_before_the_rerun_finishes() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    write_file(&root, "plant-a/voltage.csv", &epoch_csv(3));

    let store = MockPointStore::new();
    store.set_fail_push(true);
    let manager = build_manager(store.clone(), &test_config(&dir));

    let session_id = manager.create(request(&root, "plant-a")).await.unwrap();
    wait_completed(&manager, session_id).await;

    store.set_fail_push(false);
    let moved = manager.restart(session_id, false).await.unwrap();
    assert_eq!(moved, 1);

    // the rerun is committed before restart() returns: a caller that
    // polls immediately never mistakes the prior run's COMPLETED for
    // the rerun being done
    let snapshot = manager.get(session_id).await.unwrap();
    assert_eq!(snapshot.stats.runs.len(), 2);
    match snapshot.status {
        SessionStatus::Ingesting => {}
        SessionStatus::Completed => assert!(snapshot.stats.runs[1].ended_at.is_some()),
        other => panic!("unexpected status right after restart: {:?}", other),
    }

    let snapshot = wait_until(&manager, session_id, "rerun completed", |s| {
        s.stats.runs.len() == 2 && s.stats.runs[1].ended_at.is_some()
    })
    .await;
    assert_eq!(snapshot.imported.len(), 1);
}

#[tokio::test]
async fn concurrent_equivalent_creates_yield_one_session() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    write_file(&root, "plant-a/temperature.csv", &epoch_csv(2));

    let store = MockPointStore::new();
    let manager = build_manager(store, &test_config(&dir));

    let (first, second) = tokio::join!(
        manager.create(request(&root, "plant-a")),
        manager.create(request(&root, "plant-a"))
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first, second);
    assert_eq!(manager.list().await.len(), 1);
    wait_completed(&manager, first).await;
}

#[tokio::test]
async fn one_session_ingests_at_a_time() {
    let dir = TempDir::new().unwrap();
    let root_a = dir.path().join("data-a");
    let root_b = dir.path().join("data-b");
    write_file(&root_a, "plant-a/slow.csv", &epoch_csv(2));
    write_file(&root_b, "plant-b/fast.csv", &epoch_csv(2));

    let store = MockPointStore::new();
    // never resolves; with a real retry delay the first run stays busy
    store.set_resolve_from(u32::MAX);
    let config = IngestConfig {
        resolver_delay_ms: 200,
        ..test_config(&dir)
    };
    let manager = build_manager(store.clone(), &config);

    let first = manager.create(request(&root_a, "plant-a")).await.unwrap();
    wait_until(&manager, first, "INGESTING", |s| {
        s.status == SessionStatus::Ingesting
    })
    .await;

    // the second session is analysed but its launch is refused
    let second = manager.create(request(&root_b, "plant-b")).await.unwrap();
    let snapshot = manager.get(second).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Analysed);
    assert!(snapshot
        .errors
        .iter()
        .any(|e| e.message.contains("another session is currently ingesting")));

    // restart is rejected while the slot is held
    let result = manager.restart(first, false).await;
    assert!(matches!(result, Err(Error::Conflict(_))));

    wait_completed(&manager, first).await;
}

#[tokio::test]
async fn sessions_survive_a_process_restart() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    write_file(&root, "plant-a/temperature.csv", &epoch_csv(3));

    let store = MockPointStore::new();
    let config = test_config(&dir);
    let manager = build_manager(store.clone(), &config);

    let session_id = manager.create(request(&root, "plant-a")).await.unwrap();
    wait_completed(&manager, session_id).await;
    manager.save().await.unwrap();

    // a fresh manager over the same session file sees the finished session
    let reloaded = build_manager(MockPointStore::new(), &config);
    assert_eq!(reloaded.load().await.unwrap(), 1);

    let snapshot = reloaded.get(session_id).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.imported.len(), 1);
    assert_eq!(snapshot.imported[0].points_read, 3);
    assert_eq!(snapshot.stats.lifetime.sent, 3);
}
