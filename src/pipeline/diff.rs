//! Reconciliation of a fresh board listing against the known snapshot.
//!
//! Every thread id falls into exactly one bucket:
//!
//! - **birth**: listed now, unknown before
//! - **update**: known before, listed now with a strictly larger change marker
//! - **death**: known before, no longer listed
//! - **unchanged**: known before, listed now with an equal or smaller marker
//!
//! Births and updates take the fresh markers and are scheduled for a detail
//! fetch. Deaths are only counted and dropped from the board's entries.
//! Unchanged threads keep their stored markers, so a marker never moves
//! backwards.

use std::collections::HashMap;

use crate::models::{BoardEntries, Listing, Markers, WorkItem};

/// Birth/update/death counts of one or more reconciliations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub births: usize,
    pub updates: usize,
    pub deaths: usize,
}

impl DiffStats {
    /// Add another board's counts to this total.
    pub fn absorb(&mut self, other: DiffStats) {
        self.births += other.births;
        self.updates += other.updates;
        self.deaths += other.deaths;
    }

    pub fn has_changes(&self) -> bool {
        self.births + self.updates + self.deaths > 0
    }
}

/// Result of reconciling one board.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Entries to keep for the board after this cycle
    pub entries: BoardEntries,
    /// Births and updates, in listing order
    pub worklist: Vec<WorkItem>,
    pub births: Vec<String>,
    pub updates: Vec<String>,
    /// Sorted for stable output
    pub deaths: Vec<String>,
}

impl Reconciliation {
    pub fn stats(&self) -> DiffStats {
        DiffStats {
            births: self.births.len(),
            updates: self.updates.len(),
            deaths: self.deaths.len(),
        }
    }
}

/// Flatten a listing into its thread ids (first-seen order) and markers.
///
/// An id listed on several pages keeps its position of first appearance
/// and the markers of its last appearance.
pub fn flatten_listing(listing: &Listing) -> (Vec<String>, BoardEntries) {
    let mut order = Vec::with_capacity(listing.thread_count());
    let mut entries: BoardEntries = HashMap::with_capacity(listing.thread_count());

    for thread in listing.threads() {
        let id = thread.id();
        let markers = Markers::new(thread.last_modified, thread.replies);
        if entries.insert(id.clone(), markers).is_none() {
            order.push(id);
        }
    }

    (order, entries)
}

/// Reconcile a board's fresh listing against its prior entries.
///
/// `prior` is `None` for a board that has never been seen, in which case
/// every listed thread is a birth.
pub fn reconcile(board: &str, prior: Option<BoardEntries>, listing: &Listing) -> Reconciliation {
    let (order, fresh) = flatten_listing(listing);

    let Some(prior) = prior else {
        log::debug!("New board: /{}/ added to monitor list", board);
        let worklist = order.iter().map(|id| WorkItem::new(board, id)).collect();
        return Reconciliation {
            entries: fresh,
            worklist,
            births: order,
            ..Reconciliation::default()
        };
    };

    let mut deaths: Vec<String> = prior
        .keys()
        .filter(|id| !fresh.contains_key(*id))
        .cloned()
        .collect();
    deaths.sort_unstable();
    for id in &deaths {
        log::debug!("Thread died: /{}/{}", board, id);
    }

    let mut result = Reconciliation {
        entries: HashMap::with_capacity(fresh.len()),
        deaths,
        ..Reconciliation::default()
    };

    for id in order {
        let current = fresh[&id];
        match prior.get(&id) {
            None => {
                log::debug!("New thread: /{}/{}", board, id);
                result.entries.insert(id.clone(), current);
                result.worklist.push(WorkItem::new(board, &id));
                result.births.push(id);
            }
            Some(known) if current.last_modified > known.last_modified => {
                log::debug!("Thread updated: /{}/{}", board, id);
                result.entries.insert(id.clone(), current);
                result.worklist.push(WorkItem::new(board, &id));
                result.updates.push(id);
            }
            Some(known) => {
                log::debug!("No update needed for thread /{}/{}", board, id);
                result.entries.insert(id, *known);
            }
        }
    }

    result
}
