//! Key-wise merging of fetched thread details into stored ones.

use crate::error::Result;
use crate::models::ThreadPayload;
use crate::services::{ApiTransport, ItemFetch};
use crate::storage::SnapshotStore;

/// What happened to one scheduled thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// No stored record existed; the fetched detail was saved
    Created,
    /// The fetched detail was merged into the stored record
    Merged,
    /// The thread is gone (404 or retries exhausted); storage untouched
    Gone,
    /// The stored record was unreadable; it was set aside and the fetched
    /// detail saved in its place
    Recovered,
}

/// Merge `fresh` into `existing`.
///
/// Keys only present in `existing` are kept; keys present in `fresh`
/// override. Nested values are replaced whole.
pub fn merge_payload(existing: &mut ThreadPayload, fresh: ThreadPayload) {
    for (key, value) in fresh {
        existing.insert(key, value);
    }
}

/// Stored state of a thread before a capture.
enum Stored {
    Missing,
    Readable(ThreadPayload),
    Unreadable,
}

/// Fetch one thread and merge it into the store.
///
/// An unreadable stored record is only moved aside once a fresh detail is
/// in hand. Only store failures are returned as errors.
pub async fn capture_thread(
    transport: &dyn ApiTransport,
    store: &dyn SnapshotStore,
    board: &str,
    thread: &str,
) -> Result<CaptureOutcome> {
    let stored = match store.load_thread(board, thread).await {
        Ok(Some(payload)) => Stored::Readable(payload),
        Ok(None) => Stored::Missing,
        Err(e) if e.is_corrupt() => {
            log::warn!(
                "Stored thread /{}/{} is unreadable ({}), writing a new record instead of merging",
                board,
                thread,
                e
            );
            Stored::Unreadable
        }
        Err(e) => return Err(e),
    };

    let fresh = match transport.fetch_item(board, thread).await? {
        ItemFetch::Found(payload) => payload,
        ItemFetch::Gone(reason) => {
            log::warn!(
                "No thread returned for /{}/{} ({:?}), skipping",
                board,
                thread,
                reason
            );
            return Ok(CaptureOutcome::Gone);
        }
    };

    match stored {
        Stored::Readable(mut payload) => {
            merge_payload(&mut payload, fresh);
            store.save_thread(board, thread, &payload).await?;
            Ok(CaptureOutcome::Merged)
        }
        Stored::Missing => {
            store.save_thread(board, thread, &fresh).await?;
            Ok(CaptureOutcome::Created)
        }
        Stored::Unreadable => {
            store.set_aside_thread(board, thread).await?;
            store.save_thread(board, thread, &fresh).await?;
            Ok(CaptureOutcome::Recovered)
        }
    }
}
