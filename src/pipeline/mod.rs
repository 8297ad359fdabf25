//! Monitoring pipeline.
//!
//! - `diff`: classify threads of a fresh listing as births, updates, deaths
//! - `merge`: fetch a thread and merge it into storage
//! - `monitor`: one full cycle over the monitored boards
//! - `requester`: background task lifecycle and one-shot operations

pub mod diff;
pub mod merge;
pub mod monitor;
pub mod requester;

pub use diff::{DiffStats, Reconciliation, flatten_listing, reconcile};
pub use merge::{CaptureOutcome, capture_thread, merge_payload};
pub use monitor::{CycleStats, Monitor};
pub use requester::{MonitorState, Requester};
