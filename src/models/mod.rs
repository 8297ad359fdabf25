// src/models/mod.rs

//! Domain models for the monitor.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod board;
mod config;
mod snapshot;

// Re-export all public types
pub use board::{BoardIndex, BoardInfo, Listing, Page, ThreadPayload, ThreadSummary};
pub use config::{
    ApiConfig, BoardSelection, BucketGranularity, Config, LoggingConfig, MonitorConfig,
    StorageConfig,
};
pub use snapshot::{BoardEntries, Markers, Snapshot, WorkItem};
