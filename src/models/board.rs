// src/models/board.rs

//! Wire shapes of the board index and thread listing documents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw detail document of one thread, merged key-wise on rewrite.
pub type ThreadPayload = Map<String, Value>;

/// Document returned by the board index endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardIndex {
    pub boards: Vec<BoardInfo>,

    /// Top-level fields other than `boards`, kept for persistence
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BoardIndex {
    /// Board codes in index order.
    pub fn codes(&self) -> Vec<String> {
        self.boards.iter().map(|b| b.board.clone()).collect()
    }
}

/// A single board entry of the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardInfo {
    /// Short board code (e.g., "g")
    pub board: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Summary of one thread as it appears on a listing page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadSummary {
    /// Thread id
    pub no: u64,

    /// Change marker (last-modified epoch)
    pub last_modified: i64,

    /// Size marker (reply count)
    #[serde(default)]
    pub replies: i64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ThreadSummary {
    pub fn new(no: u64, last_modified: i64, replies: i64) -> Self {
        Self {
            no,
            last_modified,
            replies,
            extra: Map::new(),
        }
    }

    /// String-normalized id used as the snapshot key.
    pub fn id(&self) -> String {
        self.no.to_string()
    }
}

/// One page of a board listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Page {
    #[serde(default)]
    pub threads: Vec<ThreadSummary>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Page {
    pub fn new(threads: Vec<ThreadSummary>) -> Self {
        Self {
            threads,
            extra: Map::new(),
        }
    }
}

/// Ordered pages of thread summaries for one board, as fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct Listing(pub Vec<Page>);

impl Listing {
    /// Iterate over every thread summary in page order.
    pub fn threads(&self) -> impl Iterator<Item = &ThreadSummary> {
        self.0.iter().flat_map(|page| page.threads.iter())
    }

    /// Total number of thread summaries across pages.
    pub fn thread_count(&self) -> usize {
        self.0.iter().map(|page| page.threads.len()).sum()
    }
}
