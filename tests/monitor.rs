//! End-to-end monitor behavior against a scripted API and a temp directory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chanwatch::error::{AppError, Result};
use chanwatch::models::{
    BoardIndex, BoardSelection, Config, Listing, Markers, Page, Snapshot, ThreadPayload,
    ThreadSummary,
};
use chanwatch::pipeline::{CaptureOutcome, Monitor, MonitorState, Requester};
use chanwatch::services::{ApiTransport, GoneReason, ItemFetch};
use chanwatch::storage::{LocalStore, SnapshotStore};
use serde_json::json;
use tempfile::TempDir;

const BUCKET: &str = "2024_01_01";

/// Scripted API: listings and thread documents are set by the test.
#[derive(Default)]
struct StubApi {
    boards: Mutex<Option<Vec<String>>>,
    listings: Mutex<HashMap<String, Listing>>,
    threads: Mutex<HashMap<(String, String), ItemFetch>>,
    item_calls: Mutex<Vec<(String, String)>>,
    listing_calls: AtomicUsize,
    /// Cleared on the first thread fetch, to simulate a stop request
    stop_flag: Mutex<Option<Arc<AtomicBool>>>,
    /// Makes listing fetches panic
    broken: AtomicBool,
}

impl StubApi {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_boards(&self, boards: &[&str]) {
        *self.boards.lock().unwrap() = Some(boards.iter().map(|b| b.to_string()).collect());
    }

    fn set_listing(&self, board: &str, threads: &[(u64, i64, i64)]) {
        let page = Page::new(
            threads
                .iter()
                .map(|&(no, modified, replies)| ThreadSummary::new(no, modified, replies))
                .collect(),
        );
        self.listings
            .lock()
            .unwrap()
            .insert(board.to_string(), Listing(vec![page]));
    }

    fn set_thread(&self, board: &str, thread: &str, result: ItemFetch) {
        self.threads
            .lock()
            .unwrap()
            .insert((board.to_string(), thread.to_string()), result);
    }

    fn item_calls(&self) -> Vec<(String, String)> {
        self.item_calls.lock().unwrap().clone()
    }

    fn total_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst) + self.item_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ApiTransport for StubApi {
    async fn fetch_board_index(&self) -> Result<BoardIndex> {
        tokio::task::yield_now().await;
        match self.boards.lock().unwrap().clone() {
            Some(codes) => Ok(serde_json::from_value(json!({
                "boards": codes.iter().map(|c| json!({"board": c})).collect::<Vec<_>>()
            }))?),
            None => Err(AppError::transport("boards.json", 503)),
        }
    }

    async fn fetch_listing(&self, board: &str) -> Result<Listing> {
        tokio::task::yield_now().await;
        if self.broken.load(Ordering::SeqCst) {
            panic!("listing fetch blew up");
        }
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        self.listings
            .lock()
            .unwrap()
            .get(board)
            .cloned()
            .ok_or_else(|| AppError::transport(format!("{board}/threads.json"), 500))
    }

    async fn fetch_item(&self, board: &str, thread: &str) -> Result<ItemFetch> {
        tokio::task::yield_now().await;
        self.item_calls
            .lock()
            .unwrap()
            .push((board.to_string(), thread.to_string()));
        if let Some(flag) = self.stop_flag.lock().unwrap().as_ref() {
            flag.store(false, Ordering::SeqCst);
        }
        let scripted = self
            .threads
            .lock()
            .unwrap()
            .get(&(board.to_string(), thread.to_string()))
            .cloned();
        Ok(scripted.unwrap_or_else(|| {
            ItemFetch::Found(payload(json!({"no": thread.parse::<u64>().unwrap()})))
        }))
    }
}

fn payload(value: serde_json::Value) -> ThreadPayload {
    value.as_object().cloned().unwrap()
}

fn boards(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

fn monitor(api: &Arc<StubApi>, store: &Arc<LocalStore>) -> Monitor {
    Monitor::new(
        Arc::clone(api) as Arc<dyn ApiTransport>,
        Arc::clone(store) as Arc<dyn SnapshotStore>,
        Arc::new(AtomicBool::new(true)),
    )
}

fn thread_path(tmp: &TempDir, board: &str, thread: &str) -> std::path::PathBuf {
    tmp.path()
        .join(format!("saves/{BUCKET}/threads/{board}/{thread}.json"))
}

#[tokio::test]
async fn first_cycle_captures_every_thread() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    api.set_listing("g", &[(1, 100, 0), (2, 100, 4)]);
    let monitor = monitor(&api, &store);

    let (snapshot, stats) = monitor.run_cycle(&boards(&["g"]), Snapshot::new()).await;

    assert_eq!(stats.diff.births, 2);
    assert_eq!(stats.created, 2);
    assert_eq!(snapshot.board("g").unwrap()["2"], Markers::new(100, 4));
    assert!(thread_path(&tmp, "g", "1").exists());
    assert!(thread_path(&tmp, "g", "2").exists());
    assert!(store.load_latest_listing("g").await.unwrap().is_some());
}

#[tokio::test]
async fn update_fetches_only_changed_thread_and_merges() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    let monitor = monitor(&api, &store);

    api.set_listing("g", &[(1, 100, 0), (2, 100, 0)]);
    api.set_thread("g", "1", ItemFetch::Found(payload(json!({"no": 1, "archived": 0}))));
    let (snapshot, _) = monitor.run_cycle(&boards(&["g"]), Snapshot::new()).await;

    api.set_listing("g", &[(1, 150, 2), (2, 100, 0)]);
    api.set_thread("g", "1", ItemFetch::Found(payload(json!({"no": 1, "replies": 2}))));
    let (snapshot, stats) = monitor.run_cycle(&boards(&["g"]), snapshot).await;

    assert_eq!(stats.diff.updates, 1);
    assert_eq!(stats.merged, 1);
    assert_eq!(api.item_calls().len(), 3);
    assert_eq!(api.item_calls()[2], ("g".to_string(), "1".to_string()));
    assert_eq!(snapshot.board("g").unwrap()["1"], Markers::new(150, 2));

    let stored = store.load_thread("g", "1").await.unwrap().unwrap();
    assert_eq!(stored, payload(json!({"no": 1, "archived": 0, "replies": 2})));
}

#[tokio::test]
async fn unchanged_listing_schedules_nothing() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    api.set_listing("g", &[(1, 100, 0)]);
    let monitor = monitor(&api, &store);

    let (snapshot, _) = monitor.run_cycle(&boards(&["g"]), Snapshot::new()).await;
    let (_, stats) = monitor.run_cycle(&boards(&["g"]), snapshot).await;

    assert_eq!(stats.scheduled, 0);
    assert!(!stats.diff.has_changes());
    assert_eq!(api.item_calls().len(), 1);
}

#[tokio::test]
async fn gone_thread_leaves_storage_untouched() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    let monitor = monitor(&api, &store);

    let stored = payload(json!({"no": 1, "posts": [{"no": 1}]}));
    store.save_thread("g", "1", &stored).await.unwrap();

    let mut prior = Snapshot::new();
    prior.insert_board("g", [("1".to_string(), Markers::new(100, 0))].into());
    api.set_listing("g", &[(1, 150, 1), (2, 10, 0)]);
    api.set_thread("g", "1", ItemFetch::Gone(GoneReason::NotFound));
    api.set_thread("g", "2", ItemFetch::Gone(GoneReason::RetriesExhausted));

    let (snapshot, stats) = monitor.run_cycle(&boards(&["g"]), prior).await;

    assert_eq!(stats.gone, 2);
    assert_eq!(stats.captured(), 0);
    assert_eq!(store.load_thread("g", "1").await.unwrap(), Some(stored));
    assert!(!thread_path(&tmp, "g", "2").exists());
    // markers advance even though the fetch failed
    assert_eq!(snapshot.board("g").unwrap()["1"], Markers::new(150, 1));
}

#[tokio::test]
async fn corrupt_stored_thread_is_set_aside_and_recaptured() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    let monitor = monitor(&api, &store);

    let path = thread_path(&tmp, "g", "1");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"{\"no\": 1, \"posts\": [").unwrap();
    api.set_listing("g", &[(1, 100, 0), (2, 100, 0)]);
    api.set_thread("g", "1", ItemFetch::Found(payload(json!({"no": 1, "replies": 0}))));

    let (snapshot, stats) = monitor.run_cycle(&boards(&["g"]), Snapshot::new()).await;

    assert_eq!(stats.recovered, 1);
    assert_eq!(stats.created, 1);
    assert_eq!(api.item_calls().len(), 2);
    let aside = path.with_file_name("1.corrupt.json");
    assert_eq!(std::fs::read(&aside).unwrap(), b"{\"no\": 1, \"posts\": [");
    assert_eq!(
        store.load_thread("g", "1").await.unwrap(),
        Some(payload(json!({"no": 1, "replies": 0})))
    );

    // later changes merge into the fresh record as usual
    api.set_listing("g", &[(1, 200, 3), (2, 100, 0)]);
    api.set_thread("g", "1", ItemFetch::Found(payload(json!({"no": 1, "replies": 3}))));
    let (_, stats) = monitor.run_cycle(&boards(&["g"]), snapshot).await;

    assert_eq!(stats.merged, 1);
    assert_eq!(stats.recovered, 0);
    assert_eq!(api.item_calls().len(), 3);
    assert_eq!(
        store.load_thread("g", "1").await.unwrap(),
        Some(payload(json!({"no": 1, "replies": 3})))
    );
}

#[tokio::test]
async fn corrupt_stored_thread_stays_when_thread_is_gone() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    let monitor = monitor(&api, &store);

    let path = thread_path(&tmp, "g", "1");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"{").unwrap();
    api.set_listing("g", &[(1, 100, 0)]);
    api.set_thread("g", "1", ItemFetch::Gone(GoneReason::NotFound));

    let (_, stats) = monitor.run_cycle(&boards(&["g"]), Snapshot::new()).await;

    assert_eq!(stats.gone, 1);
    assert_eq!(std::fs::read(&path).unwrap(), b"{");
    assert!(!path.with_file_name("1.corrupt.json").exists());
}

#[tokio::test]
async fn failing_board_keeps_prior_state_and_others_continue() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    let monitor = monitor(&api, &store);
    api.set_listing("g", &[(1, 100, 0)]);

    let mut prior = Snapshot::new();
    prior.insert_board("a", [("9".to_string(), Markers::new(5, 0))].into());

    let (snapshot, stats) = monitor.run_cycle(&boards(&["a", "g"]), prior).await;

    assert_eq!(stats.boards_failed, 1);
    assert_eq!(stats.boards_scanned, 1);
    assert_eq!(snapshot.board("a").unwrap()["9"], Markers::new(5, 0));
    assert_eq!(stats.created, 1);
}

#[tokio::test]
async fn resume_from_saved_listing_skips_known_threads() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    api.set_listing("g", &[(1, 100, 0), (2, 200, 3)]);

    let first = monitor(&api, &store);
    first.run_cycle(&boards(&["g"]), Snapshot::new()).await;
    assert_eq!(api.item_calls().len(), 2);

    // a new process: same store, empty memory
    api.set_listing("g", &[(1, 100, 0), (2, 260, 5), (3, 1, 0)]);
    let restarted = monitor(&api, &store);
    let snapshot = restarted
        .load_previous(&boards(&["g", "a"]), Snapshot::new())
        .await;
    assert_eq!(snapshot.thread_count(), 2);
    assert!(!snapshot.contains_board("a"));

    let (_, stats) = restarted.run_cycle(&boards(&["g"]), snapshot).await;
    assert_eq!(stats.diff.births, 1);
    assert_eq!(stats.diff.updates, 1);
    assert_eq!(api.item_calls().len(), 4);
}

#[tokio::test]
async fn corrupt_saved_listing_means_all_births() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let dir = tmp.path().join(format!("saves/{BUCKET}/threads_on_boards"));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("g.json"), b"not json").unwrap();

    let api = StubApi::new();
    api.set_listing("g", &[(1, 100, 0)]);
    let monitor = monitor(&api, &store);

    let snapshot = monitor.load_previous(&boards(&["g"]), Snapshot::new()).await;
    assert!(!snapshot.contains_board("g"));

    let (_, stats) = monitor.run_cycle(&boards(&["g"]), snapshot).await;
    assert_eq!(stats.diff.births, 1);
}

#[tokio::test]
async fn stop_request_is_honored_between_threads() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    api.set_listing("g", &[(1, 100, 0), (2, 100, 0), (3, 100, 0)]);

    let running = Arc::new(AtomicBool::new(true));
    *api.stop_flag.lock().unwrap() = Some(Arc::clone(&running));
    let monitor = Monitor::new(
        Arc::clone(&api) as Arc<dyn ApiTransport>,
        Arc::clone(&store) as Arc<dyn SnapshotStore>,
        running,
    );

    let (_, stats) = monitor.run_cycle(&boards(&["g"]), Snapshot::new()).await;

    assert!(stats.interrupted);
    assert_eq!(stats.scheduled, 3);
    assert_eq!(api.item_calls().len(), 1);
    assert!(thread_path(&tmp, "g", "1").exists());
}

#[tokio::test]
async fn exclude_selection_filters_index() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    api.set_boards(&["a", "b", "g"]);
    let monitor = monitor(&api, &store);

    let resolved = monitor
        .resolve_boards(&BoardSelection::Exclude(boards(&["b"])))
        .await
        .unwrap();
    assert_eq!(resolved, boards(&["a", "g"]));

    *api.boards.lock().unwrap() = None;
    let err = monitor.resolve_boards(&BoardSelection::All).await.unwrap_err();
    assert!(matches!(err, AppError::Discovery(_)));
    // an include list needs no index
    assert!(monitor
        .resolve_boards(&BoardSelection::Include(boards(&["x"])))
        .await
        .is_ok());
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requester_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    api.set_listing("g", &[(1, 100, 0)]);

    let mut requester = Requester::new(
        Arc::clone(&api) as Arc<dyn ApiTransport>,
        store,
        BoardSelection::Include(boards(&["g"])),
    );
    assert_eq!(requester.state(), MonitorState::Stopped);

    requester.begin_monitoring().unwrap();
    requester.begin_monitoring().unwrap();
    assert!(requester.is_monitoring());

    wait_for(|| requester.state() == MonitorState::Running).await;
    wait_for(|| api.listing_calls.load(Ordering::SeqCst) >= 2).await;

    requester.end_monitoring().await.unwrap();
    assert_eq!(requester.state(), MonitorState::Stopped);
    assert!(!requester.is_monitoring());

    // nothing is fetched once end_monitoring has returned
    let calls = api.total_calls();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(api.total_calls(), calls);

    // the thread was captured once; later cycles saw no change
    assert_eq!(api.item_calls().len(), 1);
    assert!(thread_path(&tmp, "g", "1").exists());

    // stopping twice is harmless
    requester.end_monitoring().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discovery_failure_ends_monitoring() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();

    let mut requester = Requester::new(
        Arc::clone(&api) as Arc<dyn ApiTransport>,
        store,
        BoardSelection::All,
    );
    requester.begin_monitoring().unwrap();
    wait_for(|| !requester.is_monitoring()).await;

    assert_eq!(requester.state(), MonitorState::Stopped);
    let err = requester.end_monitoring().await.unwrap_err();
    assert!(matches!(err, AppError::Discovery(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_after_discovery_failure_runs_fresh() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    api.set_listing("g", &[(1, 1, 0)]);

    let mut requester = Requester::new(
        Arc::clone(&api) as Arc<dyn ApiTransport>,
        store,
        BoardSelection::All,
    );
    requester.begin_monitoring().unwrap();
    wait_for(|| !requester.is_monitoring()).await;

    // the index is reachable now; the earlier failure is reported at restart
    api.set_boards(&["g"]);
    requester.begin_monitoring().unwrap();
    assert!(requester.is_monitoring());
    wait_for(|| api.item_calls().len() == 1).await;
    assert_eq!(requester.state(), MonitorState::Running);

    requester.end_monitoring().await.unwrap();
    assert_eq!(requester.state(), MonitorState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicked_task_still_ends_stopped() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    api.broken.store(true, Ordering::SeqCst);

    let mut requester = Requester::new(
        Arc::clone(&api) as Arc<dyn ApiTransport>,
        store,
        BoardSelection::Include(boards(&["g"])),
    );
    requester.begin_monitoring().unwrap();
    wait_for(|| !requester.is_monitoring()).await;

    let err = requester.end_monitoring().await.unwrap_err();
    assert!(matches!(err, AppError::Monitor(_)));
    assert_eq!(requester.state(), MonitorState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn selection_change_applies_next_cycle() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    api.set_boards(&["a", "g"]);
    api.set_listing("a", &[(7, 1, 0)]);
    api.set_listing("g", &[(1, 1, 0)]);

    let mut requester = Requester::new(
        Arc::clone(&api) as Arc<dyn ApiTransport>,
        store,
        BoardSelection::Include(boards(&["g"])),
    );
    assert!(requester
        .set_include_exclude_boards(Some(boards(&["g"])), Some(boards(&["a"])))
        .is_err());

    requester.begin_monitoring().unwrap();
    wait_for(|| api.item_calls().len() == 1).await;

    requester
        .set_include_exclude_boards(None, Some(boards(&["g"])))
        .unwrap();
    wait_for(|| api.item_calls().len() == 2).await;
    requester.end_monitoring().await.unwrap();

    assert_eq!(api.item_calls()[1], ("a".to_string(), "7".to_string()));
}

#[tokio::test]
async fn disabled_config_does_not_start() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.root_dir = tmp.path().display().to_string();

    let mut requester = Requester::from_config(&config).unwrap();
    assert!(!requester.start_if_enabled().unwrap());
    assert!(!requester.is_monitoring());
}

#[tokio::test]
async fn one_shot_capture_merges_into_store() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::with_fixed_bucket(tmp.path(), BUCKET));
    let api = StubApi::new();
    api.set_boards(&["g"]);
    api.set_listing("g", &[(1, 1, 0)]);
    let requester = Requester::new(
        Arc::clone(&api) as Arc<dyn ApiTransport>,
        Arc::clone(&store) as Arc<dyn SnapshotStore>,
        BoardSelection::All,
    );

    assert_eq!(requester.save_board_index().await.unwrap().codes(), vec!["g"]);
    assert!(tmp.path().join(format!("saves/{BUCKET}/boards.json")).exists());
    assert_eq!(requester.save_board_listing("g").await.unwrap().thread_count(), 1);

    assert_eq!(
        requester.capture_thread("g", "1").await.unwrap(),
        CaptureOutcome::Created
    );
    assert_eq!(
        requester.capture_thread("g", "1").await.unwrap(),
        CaptureOutcome::Merged
    );
}
