// src/models/snapshot.rs

//! In-memory record of the threads already captured per board.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Change and size markers of a tracked thread.
///
/// Only compared, never interpreted: `last_modified` drives re-fetch
/// decisions and `replies` is carried for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markers {
    pub last_modified: i64,
    pub replies: i64,
}

impl Markers {
    pub fn new(last_modified: i64, replies: i64) -> Self {
        Self {
            last_modified,
            replies,
        }
    }
}

/// Thread id (string-normalized) to markers for a single board.
pub type BoardEntries = HashMap<String, Markers>;

/// A (board, thread) pair scheduled for a detail fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub board: String,
    pub thread: String,
}

impl WorkItem {
    pub fn new(board: impl Into<String>, thread: impl Into<String>) -> Self {
        Self {
            board: board.into(),
            thread: thread.into(),
        }
    }
}

/// Last-known thread state for every monitored board.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    boards: HashMap<String, BoardEntries>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries for a board, if the board has been seen before.
    pub fn board(&self, code: &str) -> Option<&BoardEntries> {
        self.boards.get(code)
    }

    /// Remove and return a board's entries so they can be reconciled by value.
    pub fn take_board(&mut self, code: &str) -> Option<BoardEntries> {
        self.boards.remove(code)
    }

    /// Replace a board's entries.
    pub fn insert_board(&mut self, code: impl Into<String>, entries: BoardEntries) {
        self.boards.insert(code.into(), entries);
    }

    pub fn contains_board(&self, code: &str) -> bool {
        self.boards.contains_key(code)
    }

    /// Number of boards with recorded state.
    pub fn board_count(&self) -> usize {
        self.boards.len()
    }

    /// Number of threads tracked across every board.
    pub fn thread_count(&self) -> usize {
        self.boards.values().map(HashMap::len).sum()
    }
}
