//! Lifecycle control of the background monitor.
//!
//! `Requester` owns the background task. The task moves through
//! `Starting → Running → Stopping → Stopped`; a stop request only takes
//! effect at the top of a cycle or between two thread captures, and
//! [`Requester::end_monitoring`] waits for the task to exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::{AppError, Result};
use crate::models::{BoardIndex, BoardSelection, Config, Listing, Snapshot};
use crate::pipeline::merge::{self, CaptureOutcome};
use crate::pipeline::monitor::Monitor;
use crate::services::{ApiClient, ApiTransport, RateLimiter};
use crate::storage::{LocalStore, SnapshotStore};

/// Pause between checks while the selection resolves to no boards.
const IDLE_PAUSE: Duration = Duration::from_secs(1);

/// Lifecycle state of the background monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug)]
struct Membership {
    selection: BoardSelection,
    stale: bool,
}

/// State shared between the controller and the background task.
#[derive(Debug)]
struct Control {
    running: Arc<AtomicBool>,
    state: Mutex<MonitorState>,
    membership: Mutex<Membership>,
    /// Error that ended the last run, until someone collects it
    failure: Mutex<Option<AppError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Control {
    fn state(&self) -> MonitorState {
        *lock(&self.state)
    }

    fn set_state(&self, state: MonitorState) {
        *lock(&self.state) = state;
    }

    /// Move to `to` only if currently in `from`.
    fn transition(&self, from: MonitorState, to: MonitorState) -> bool {
        let mut state = lock(&self.state);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Current selection, clearing the stale mark.
    fn take_selection(&self) -> BoardSelection {
        let mut membership = lock(&self.membership);
        membership.stale = false;
        membership.selection.clone()
    }

    fn is_stale(&self) -> bool {
        lock(&self.membership).stale
    }

    fn take_failure(&self) -> Option<AppError> {
        lock(&self.failure).take()
    }
}

/// Controller for monitoring plus one-shot capture operations.
pub struct Requester {
    transport: Arc<dyn ApiTransport>,
    store: Arc<dyn SnapshotStore>,
    control: Arc<Control>,
    enabled: bool,
    task: Option<JoinHandle<()>>,
}

impl Requester {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        store: Arc<dyn SnapshotStore>,
        selection: BoardSelection,
    ) -> Self {
        Self {
            transport,
            store,
            control: Arc::new(Control {
                running: Arc::new(AtomicBool::new(false)),
                state: Mutex::new(MonitorState::Stopped),
                membership: Mutex::new(Membership {
                    selection,
                    stale: true,
                }),
                failure: Mutex::new(None),
            }),
            enabled: false,
            task: None,
        }
    }

    /// Build a requester backed by the HTTP API and local storage.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::new(config.monitor.request_time_limit()));
        let transport = Arc::new(ApiClient::from_config(&config.api, limiter)?);
        let store = Arc::new(LocalStore::from_config(&config.storage));

        let mut requester = Self::new(transport, store, config.monitor.selection()?);
        requester.enabled = config.monitor.enabled;
        Ok(requester)
    }

    /// Begin monitoring if the configuration enabled it.
    pub fn start_if_enabled(&mut self) -> Result<bool> {
        if self.enabled {
            self.begin_monitoring()?;
        }
        Ok(self.enabled)
    }

    pub fn state(&self) -> MonitorState {
        self.control.state()
    }

    pub fn is_monitoring(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Replace the board selection; it is re-resolved at the next cycle.
    pub fn set_include_exclude_boards(
        &self,
        include: Option<Vec<String>>,
        exclude: Option<Vec<String>>,
    ) -> Result<()> {
        log::info!("Updating boards to monitor");
        let selection = BoardSelection::from_lists(include, exclude)?;
        let mut membership = lock(&self.control.membership);
        membership.selection = selection;
        membership.stale = true;
        Ok(())
    }

    /// Start the background monitor. Does nothing if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin_monitoring(&mut self) -> Result<()> {
        if self.is_monitoring() {
            log::debug!("Monitoring already running");
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::monitor(format!("no async runtime: {e}")))?;

        // a finished run is replaced, but its failure is still reported
        if self.task.take().is_some() {
            if let Some(e) = self.control.take_failure() {
                log::warn!("Previous monitoring run ended with an error: {}", e);
            }
        }

        log::info!("Beginning monitoring");
        self.control.running.store(true, Ordering::SeqCst);
        self.control.set_state(MonitorState::Starting);
        lock(&self.control.membership).stale = true;

        let monitor = Monitor::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.store),
            Arc::clone(&self.control.running),
        );
        let control = Arc::clone(&self.control);
        self.task = Some(runtime.spawn(run_monitor(monitor, control)));
        log::debug!("Monitoring task started");
        Ok(())
    }

    /// Stop the background monitor and wait for it to exit.
    ///
    /// Returns the error that ended the loop early, if any.
    pub async fn end_monitoring(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        log::info!("Ending loop and closing monitoring task");
        self.control.running.store(false, Ordering::SeqCst);
        self.control.transition(MonitorState::Starting, MonitorState::Stopping);
        self.control.transition(MonitorState::Running, MonitorState::Stopping);

        let joined = task.await;
        self.control.set_state(MonitorState::Stopped);
        joined.map_err(|e| AppError::monitor(format!("monitoring task failed: {e}")))?;

        log::info!("Closed monitoring task");
        match self.control.take_failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fetch the board index and save it.
    pub async fn save_board_index(&self) -> Result<BoardIndex> {
        let index = self.transport.fetch_board_index().await?;
        self.store.save_board_index(&index).await?;
        Ok(index)
    }

    /// Fetch one board's listing and save it.
    pub async fn save_board_listing(&self, board: &str) -> Result<Listing> {
        let listing = self.transport.fetch_listing(board).await?;
        self.store.save_listing(board, &listing).await?;
        Ok(listing)
    }

    /// Fetch one thread and merge it into storage.
    pub async fn capture_thread(&self, board: &str, thread: &str) -> Result<CaptureOutcome> {
        merge::capture_thread(self.transport.as_ref(), self.store.as_ref(), board, thread).await
    }
}

impl Drop for Requester {
    fn drop(&mut self) {
        // A detached task still winds down at its next checkpoint.
        self.control.running.store(false, Ordering::SeqCst);
    }
}

/// Body of the background task.
async fn run_monitor(monitor: Monitor, control: Arc<Control>) {
    let result = monitor_loop(&monitor, &control).await;
    control.running.store(false, Ordering::SeqCst);

    if let Err(e) = result {
        log::error!("Monitoring stopped: {}", e);
        *lock(&control.failure) = Some(e);
    }
    control.set_state(MonitorState::Stopped);
}

async fn monitor_loop(monitor: &Monitor, control: &Control) -> Result<()> {
    let mut boards = monitor.resolve_boards(&control.take_selection()).await?;
    let mut snapshot = monitor.load_previous(&boards, Snapshot::new()).await;
    control.transition(MonitorState::Starting, MonitorState::Running);

    let mut cycle: u64 = 0;
    while monitor.is_running() {
        if control.is_stale() {
            boards = monitor.resolve_boards(&control.take_selection()).await?;
            snapshot = monitor.load_previous(&boards, snapshot).await;
        }

        if boards.is_empty() {
            log::warn!("No boards to monitor, waiting for a new selection");
            sleep(IDLE_PAUSE).await;
            continue;
        }

        cycle += 1;
        log::debug!("Started cycle {}", cycle);
        let (next, _stats) = monitor.run_cycle(&boards, snapshot).await;
        snapshot = next;
        log::debug!("Ended cycle {}", cycle);
    }
    Ok(())
}
