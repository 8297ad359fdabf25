//! One monitoring cycle: listings, reconciliation, thread capture.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::{AppError, Result};
use crate::models::{BoardSelection, Snapshot, WorkItem};
use crate::pipeline::diff::{DiffStats, flatten_listing, reconcile};
use crate::pipeline::merge::{CaptureOutcome, capture_thread};
use crate::services::ApiTransport;
use crate::storage::SnapshotStore;

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub boards_scanned: usize,
    pub boards_failed: usize,
    pub diff: DiffStats,
    /// Worklist length before draining
    pub scheduled: usize,
    pub created: usize,
    pub merged: usize,
    pub gone: usize,
    /// Unreadable records replaced by a fresh capture
    pub recovered: usize,
    pub failed: usize,
    /// Set when a stop request cut the drain short
    pub interrupted: bool,
}

impl CycleStats {
    fn record(&mut self, outcome: CaptureOutcome) {
        match outcome {
            CaptureOutcome::Created => self.created += 1,
            CaptureOutcome::Merged => self.merged += 1,
            CaptureOutcome::Gone => self.gone += 1,
            CaptureOutcome::Recovered => self.recovered += 1,
        }
    }

    /// Threads whose detail ended up in storage this cycle.
    pub fn captured(&self) -> usize {
        self.created + self.merged + self.recovered
    }
}

/// Runs monitoring cycles against a transport and a store.
///
/// Holds no thread state itself: the snapshot is passed into every cycle
/// and handed back updated.
pub struct Monitor {
    transport: Arc<dyn ApiTransport>,
    store: Arc<dyn SnapshotStore>,
    running: Arc<AtomicBool>,
}

impl Monitor {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        store: Arc<dyn SnapshotStore>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            store,
            running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolve the boards to monitor.
    ///
    /// Failing to fetch the board index is a discovery error.
    pub async fn resolve_boards(&self, selection: &BoardSelection) -> Result<Vec<String>> {
        log::debug!("Updating monitored board list");
        let index = if selection.needs_index() {
            self.transport
                .fetch_board_codes()
                .await
                .map_err(|e| AppError::discovery(e))?
        } else {
            Vec::new()
        };

        let boards = selection.resolve(&index);
        log::info!("Monitoring {} boards", boards.len());
        Ok(boards)
    }

    /// Seed the snapshot with the last saved listing of every board it
    /// does not know yet.
    ///
    /// Missing or unreadable listings leave the board unknown, so all of
    /// its threads count as births on the next cycle.
    pub async fn load_previous(&self, boards: &[String], mut snapshot: Snapshot) -> Snapshot {
        log::debug!("Checking for captures left by previous runs");
        let mut restored = 0;

        for board in boards {
            if snapshot.contains_board(board) {
                continue;
            }
            match self.store.load_latest_listing(board).await {
                Ok(Some(listing)) => {
                    let (_, entries) = flatten_listing(&listing);
                    restored += entries.len();
                    snapshot.insert_board(board.as_str(), entries);
                }
                Ok(None) => {
                    log::info!("No previous thread information for /{}/", board);
                }
                Err(e) => {
                    log::warn!(
                        "Previous listing of /{}/ is unreadable ({}), treating every thread as new",
                        board,
                        e
                    );
                }
            }
        }

        log::info!("{} threads restored from previous runs", restored);
        snapshot
    }

    /// Run one cycle over `boards` and return the updated snapshot.
    pub async fn run_cycle(&self, boards: &[String], snapshot: Snapshot) -> (Snapshot, CycleStats) {
        let mut stats = CycleStats::default();
        let (snapshot, worklist) = self.scan_boards(boards, snapshot, &mut stats).await;
        self.drain(&worklist, &mut stats).await;

        log::info!(
            "Cycle finished: {} boards ({} failed), {} births, {} updates, {} deaths, {} captured, {} gone",
            stats.boards_scanned,
            stats.boards_failed,
            stats.diff.births,
            stats.diff.updates,
            stats.diff.deaths,
            stats.captured(),
            stats.gone
        );
        (snapshot, stats)
    }

    /// Fetch every board's listing and reconcile it into the snapshot.
    async fn scan_boards(
        &self,
        boards: &[String],
        mut snapshot: Snapshot,
        stats: &mut CycleStats,
    ) -> (Snapshot, Vec<WorkItem>) {
        log::info!("Searching for threads to capture");
        let mut worklist = Vec::new();

        for board in boards {
            log::debug!("Searching for threads in /{}/", board);
            let listing = match self.transport.fetch_listing(board).await {
                Ok(listing) => listing,
                Err(e) => {
                    stats.boards_failed += 1;
                    log::warn!("Failed to fetch listing of /{}/: {}", board, e);
                    continue;
                }
            };
            stats.boards_scanned += 1;

            if let Err(e) = self.store.save_listing(board, &listing).await {
                log::warn!("Failed to save listing of /{}/: {}", board, e);
            }

            let prior = snapshot.take_board(board);
            let result = reconcile(board, prior, &listing);
            stats.diff.absorb(result.stats());
            worklist.extend(result.worklist);
            snapshot.insert_board(board.as_str(), result.entries);
        }

        stats.scheduled = worklist.len();
        log::info!("Thread deaths this cycle: {}", stats.diff.deaths);
        log::info!("Thread births this cycle: {}", stats.diff.births);
        log::info!("Thread updates this cycle: {}", stats.diff.updates);
        log::info!("{} threads scheduled for capture", worklist.len());
        (snapshot, worklist)
    }

    /// Capture scheduled threads one at a time, in order.
    ///
    /// A stop request is honored between items.
    async fn drain(&self, worklist: &[WorkItem], stats: &mut CycleStats) {
        let total = worklist.len();
        let mut previous_board: Option<&str> = None;

        for (i, item) in worklist.iter().enumerate() {
            if !self.is_running() {
                stats.interrupted = true;
                log::info!(
                    "Stop requested, {} scheduled threads not captured",
                    total - i
                );
                break;
            }

            if previous_board != Some(item.board.as_str()) {
                log::info!("Updating threads in /{}/", item.board);
                previous_board = Some(item.board.as_str());
            }

            let started = Instant::now();
            match capture_thread(
                self.transport.as_ref(),
                self.store.as_ref(),
                &item.board,
                &item.thread,
            )
            .await
            {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    stats.failed += 1;
                    log::error!(
                        "Failed to store thread /{}/{}: {}",
                        item.board,
                        item.thread,
                        e
                    );
                }
            }

            let remaining = started.elapsed().as_secs_f64() * (total - i - 1) as f64;
            log::debug!(
                "{}/{}: captured /{}/{}, about {:.0}s left in this cycle",
                i + 1,
                total,
                item.board,
                item.thread,
                remaining
            );
        }
    }
}
