//! Per-repository merge queue
//!
//! A [`MergeQueue`] is an ordered list of pending entries plus at most one
//! active entry under test on the integration branch. All mutation goes
//! through the methods below, which keep two invariants:
//!
//! - a change id appears at most once across `pending` and `active`
//! - at most one entry is active at any time
//!
//! Callers must hold the repository's [`QueueHandle`] while mutating and
//! persist through it afterwards.

mod registry;
mod storage;

pub use registry::{QueueGuard, QueueHandle, QueueRegistry};
pub use storage::{QUEUE_FORMAT_VERSION, QueueStore};

use crate::error::{Error, Result};
use crate::types::{ChangeId, QueueEntry};
use std::collections::VecDeque;
use tracing::debug;

/// Approved-but-unmerged changes of one repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeQueue {
    pending: VecDeque<QueueEntry>,
    active: Option<QueueEntry>,
}

impl MergeQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from persisted parts, rejecting records that break
    /// the uniqueness invariants.
    pub fn from_parts(pending: Vec<QueueEntry>, active: Option<QueueEntry>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for entry in active.iter().chain(pending.iter()) {
            if !seen.insert(entry.change_id) {
                return Err(Error::Storage(format!(
                    "change #{} appears more than once in the queue record",
                    entry.change_id
                )));
            }
        }

        Ok(Self {
            pending: pending.into(),
            active,
        })
    }

    /// Queue an approved change.
    ///
    /// Returns whether the queue changed, so callers only persist and
    /// notify on real mutations.
    pub fn enqueue(&mut self, entry: QueueEntry) -> bool {
        if let Some(active) = &self.active
            && active.change_id == entry.change_id
        {
            if active.approved_head == entry.approved_head {
                return false;
            }

            // The change moved under an in-flight test: drop the test and
            // queue the new head for a fresh run.
            debug!(
                change = entry.change_id,
                old_head = %active.approved_head,
                new_head = %entry.approved_head,
                "invalidating active entry"
            );
            self.active = None;
            self.pending.push_back(QueueEntry {
                test_tip: None,
                ..entry
            });
            return true;
        }

        if let Some(existing) = self
            .pending
            .iter_mut()
            .find(|e| e.change_id == entry.change_id)
        {
            if existing.approved_head == entry.approved_head {
                return false;
            }
            existing.approved_head = entry.approved_head;
            existing.test_tip = None;
            return true;
        }

        self.pending.push_back(QueueEntry {
            test_tip: None,
            ..entry
        });
        true
    }

    /// Remove and return the head of the pending list
    pub fn take_next(&mut self) -> Option<QueueEntry> {
        self.pending.pop_front()
    }

    /// Mark `entry` as the one under test.
    ///
    /// Fails if an entry is already active. That can only happen through a
    /// programming error in the caller.
    pub fn set_active(&mut self, entry: QueueEntry) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(Error::ActiveAlreadySet(active.change_id));
        }
        self.active = Some(entry);
        Ok(())
    }

    /// Clear the active slot, returning what was there
    pub fn remove_active(&mut self) -> Option<QueueEntry> {
        self.active.take()
    }

    /// Remove a pending or active entry for `change_id`.
    ///
    /// Returns whether anything was removed.
    pub fn remove_by_change_id(&mut self, change_id: ChangeId) -> bool {
        if self
            .active
            .as_ref()
            .is_some_and(|a| a.change_id == change_id)
        {
            self.active = None;
            return true;
        }

        let before = self.pending.len();
        self.pending.retain(|e| e.change_id != change_id);
        self.pending.len() != before
    }

    /// The entry under test, if any
    pub const fn active(&self) -> Option<&QueueEntry> {
        self.active.as_ref()
    }

    /// Whether an entry is under test
    pub const fn has_active(&self) -> bool {
        self.active.is_some()
    }

    /// Pending entries in queue order
    pub fn pending(&self) -> impl ExactSizeIterator<Item = &QueueEntry> {
        self.pending.iter()
    }

    /// The next entry `take_next` would return
    pub fn front(&self) -> Option<&QueueEntry> {
        self.pending.front()
    }

    /// Pending entry for `change_id`, if queued
    pub fn awaiting(&self, change_id: ChangeId) -> Option<&QueueEntry> {
        self.pending.iter().find(|e| e.change_id == change_id)
    }

    /// Whether nothing is pending or active
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.active.is_none()
    }
}
