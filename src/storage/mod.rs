//! Storage abstractions for captured board data.
//!
//! Everything is partitioned by time bucket (a day or an hour), then by
//! board and record kind.
//!
//! ## Directory Structure
//!
//! ```text
//! saves/
//! └── 2024_03_09/                    # bucket
//!     ├── boards.json                # board index
//!     ├── threads_on_boards/
//!     │   └── g.json                 # latest listing of /g/
//!     └── threads/
//!         └── g/
//!             ├── 570368.json        # merged thread detail
//!             └── 570201.corrupt.json # unreadable record, set aside
//! ```

pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{BoardIndex, Listing, ThreadPayload};

// Re-export for convenience
pub use local::LocalStore;

/// Trait for snapshot storage backends.
///
/// Records are addressed by key, never discovered by scanning names.
/// Reads of records that exist but cannot be decoded fail with
/// `AppError::CorruptRecord`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Save the board index for the current bucket.
    async fn save_board_index(&self, index: &BoardIndex) -> Result<()>;

    /// Save a board listing, superseding any earlier one in the current bucket.
    async fn save_listing(&self, board: &str, listing: &Listing) -> Result<()>;

    /// Load the most recently saved listing of a board, from any bucket.
    async fn load_latest_listing(&self, board: &str) -> Result<Option<Listing>>;

    /// Load the stored detail of a thread in the current bucket.
    async fn load_thread(&self, board: &str, thread: &str) -> Result<Option<ThreadPayload>>;

    /// Save the detail of a thread in the current bucket, replacing it.
    async fn save_thread(&self, board: &str, thread: &str, payload: &ThreadPayload) -> Result<()>;

    /// Move an unreadable thread record out of the way, bytes unchanged.
    ///
    /// Returns the key it now lives under. The thread's own key is free
    /// afterwards.
    async fn set_aside_thread(&self, board: &str, thread: &str) -> Result<String>;
}
