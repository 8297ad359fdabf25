//! Local filesystem storage implementation.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/saves/{bucket}/
//! ├── boards.json
//! ├── threads_on_boards/{board}.json
//! └── threads/{board}/{thread}.json
//!     threads/{board}/{thread}.corrupt[.N].json
//! ```
//!
//! Bucket names sort chronologically, so the newest listing of a board is
//! found by walking buckets in descending name order.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{BoardIndex, BucketGranularity, Listing, StorageConfig, ThreadPayload};
use crate::storage::SnapshotStore;

const SAVES_DIR: &str = "saves";

/// Local filesystem storage backend.
#[derive(Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
    granularity: BucketGranularity,
    fixed_bucket: Option<String>,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>, granularity: BucketGranularity) -> Self {
        Self {
            root_dir: root_dir.into(),
            granularity,
            fixed_bucket: None,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.root_dir, config.bucket)
    }

    /// Create a LocalStore that always writes into one named bucket.
    pub fn with_fixed_bucket(root_dir: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            granularity: BucketGranularity::default(),
            fixed_bucket: Some(bucket.into()),
        }
    }

    /// Bucket that writes currently go to.
    pub fn current_bucket(&self) -> String {
        match &self.fixed_bucket {
            Some(bucket) => bucket.clone(),
            None => self.granularity.bucket_for(&Local::now()),
        }
    }

    fn saves_dir(&self) -> PathBuf {
        self.root_dir.join(SAVES_DIR)
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.saves_dir().join(key)
    }

    fn board_index_key(bucket: &str) -> String {
        format!("{bucket}/boards.json")
    }

    fn listing_key(bucket: &str, board: &str) -> String {
        format!("{bucket}/threads_on_boards/{board}.json")
    }

    fn thread_key(bucket: &str, board: &str, thread: &str) -> String {
        format!("{bucket}/threads/{board}/{thread}.json")
    }

    fn set_aside_key(bucket: &str, board: &str, thread: &str, n: u32) -> String {
        match n {
            0 => format!("{bucket}/threads/{board}/{thread}.corrupt.json"),
            n => format!("{bucket}/threads/{board}/{thread}.corrupt.{n}.json"),
        }
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data; undecodable content is reported as corrupt.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AppError::corrupt(key, e)),
            None => Ok(None),
        }
    }

    /// Bucket names present on disk, newest first.
    async fn buckets_newest_first(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(self.saves_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut buckets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    buckets.push(name.to_string());
                }
            }
        }
        buckets.sort_unstable_by(|a, b| b.cmp(a));
        Ok(buckets)
    }
}

/// Reject names that would escape their directory.
fn check_segment(kind: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(AppError::validation(format!("invalid {kind} name {value:?}")))
    }
}

#[async_trait]
impl SnapshotStore for LocalStore {
    async fn save_board_index(&self, index: &BoardIndex) -> Result<()> {
        let key = Self::board_index_key(&self.current_bucket());
        self.write_json(&key, index).await?;
        log::debug!("Board index saved to {}", key);
        Ok(())
    }

    async fn save_listing(&self, board: &str, listing: &Listing) -> Result<()> {
        check_segment("board", board)?;
        let key = Self::listing_key(&self.current_bucket(), board);
        self.write_json(&key, listing).await?;
        log::debug!("Listing of /{}/ saved to {}", board, key);
        Ok(())
    }

    async fn load_latest_listing(&self, board: &str) -> Result<Option<Listing>> {
        check_segment("board", board)?;
        for bucket in self.buckets_newest_first().await? {
            let key = Self::listing_key(&bucket, board);
            if let Some(listing) = self.read_json::<Listing>(&key).await? {
                log::debug!("Found previous listing of /{}/ at {}", board, key);
                return Ok(Some(listing));
            }
        }
        Ok(None)
    }

    async fn load_thread(&self, board: &str, thread: &str) -> Result<Option<ThreadPayload>> {
        check_segment("board", board)?;
        check_segment("thread", thread)?;
        let key = Self::thread_key(&self.current_bucket(), board, thread);
        self.read_json(&key).await
    }

    async fn save_thread(&self, board: &str, thread: &str, payload: &ThreadPayload) -> Result<()> {
        check_segment("board", board)?;
        check_segment("thread", thread)?;
        let key = Self::thread_key(&self.current_bucket(), board, thread);
        self.write_json(&key, payload).await
    }

    async fn set_aside_thread(&self, board: &str, thread: &str) -> Result<String> {
        check_segment("board", board)?;
        check_segment("thread", thread)?;
        let bucket = self.current_bucket();
        let from = self.path(&Self::thread_key(&bucket, board, thread));

        // earlier set-aside copies are never overwritten
        let mut n = 0;
        let key = loop {
            let key = Self::set_aside_key(&bucket, board, thread, n);
            if !tokio::fs::try_exists(self.path(&key)).await? {
                break key;
            }
            n += 1;
        };

        tokio::fs::rename(&from, self.path(&key)).await?;
        log::warn!("Unreadable thread /{}/{} moved to {}", board, thread, key);
        Ok(key)
    }
}
