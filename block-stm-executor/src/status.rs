//! Pending / in-progress / complete bookkeeping over a block's index space.
//!
//! The scheduler keeps two of these: one for execution, which starts with every
//! index pending, and one for validation, which starts empty and receives an
//! index each time that index finishes executing.
//!
//! A blocked index stays in the pending set; it is skipped by
//! [`TaskStatusManager::take_next_pending`] until all its blockers complete.

use crate::types::TxnIndex;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Default)]
pub struct TaskStatusManager {
    pending: BTreeSet<TxnIndex>,
    in_progress: BTreeSet<TxnIndex>,
    complete: BTreeSet<TxnIndex>,
    /// blocker -> transactions waiting on it
    dependency: HashMap<TxnIndex, HashSet<TxnIndex>>,
    /// blocked transaction -> transactions it waits on
    blocker: HashMap<TxnIndex, HashSet<TxnIndex>>,
}

impl TaskStatusManager {
    /// Creates a manager with every index in `[0, num_tasks)` pending.
    pub fn new(num_tasks: usize) -> Self {
        Self {
            pending: (0..num_tasks).collect(),
            ..Default::default()
        }
    }

    /// Creates a manager with no tracked index.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Moves the lowest runnable pending index to in-progress and returns it.
    pub fn take_next_pending(&mut self) -> Option<TxnIndex> {
        let tx = self.min_pending()?;
        self.pending.remove(&tx);
        self.in_progress.insert(tx);
        Some(tx)
    }

    pub fn push_pending(&mut self, tx: TxnIndex) {
        self.pending.insert(tx);
    }

    /// Reopens every index of `set`, whatever state it was in.
    pub fn push_pending_set(&mut self, set: impl IntoIterator<Item = TxnIndex>) {
        for tx in set {
            self.complete.remove(&tx);
            self.in_progress.remove(&tx);
            self.pending.insert(tx);
        }
    }

    /// The lowest pending index that is not blocked.
    pub fn min_pending(&self) -> Option<TxnIndex> {
        self.pending.iter().copied().find(|&tx| !self.is_blocked(tx))
    }

    pub fn mark_complete(&mut self, tx: TxnIndex) {
        self.in_progress.remove(&tx);
        self.complete.insert(tx);
    }

    pub fn clear_in_progress(&mut self, tx: TxnIndex) {
        self.in_progress.remove(&tx);
    }

    pub fn clear_complete(&mut self, tx: TxnIndex) {
        self.complete.remove(&tx);
    }

    pub fn clear_pending(&mut self, tx: TxnIndex) {
        self.pending.remove(&tx);
    }

    pub fn check_pending(&self, tx: TxnIndex) -> bool {
        self.pending.contains(&tx)
    }

    pub fn check_in_progress(&self, tx: TxnIndex) -> bool {
        self.in_progress.contains(&tx)
    }

    pub fn check_complete(&self, tx: TxnIndex) -> bool {
        self.complete.contains(&tx)
    }

    pub fn count_complete(&self) -> usize {
        self.complete.len()
    }

    pub fn count_in_progress(&self) -> usize {
        self.in_progress.len()
    }

    pub fn count_pending(&self) -> usize {
        self.pending.len()
    }

    /// The largest index `M` such that every index in `[0, M]` is complete.
    pub fn max_all_complete(&self) -> Option<TxnIndex> {
        let last = *self.complete.last()?;
        if self.complete.len() == last + 1 {
            return Some(last);
        }

        let mut frontier = None;
        for (expected, &tx) in self.complete.iter().enumerate() {
            if tx != expected {
                break;
            }
            frontier = Some(tx);
        }
        frontier
    }

    /// Complete indices at or above `from`; candidates for re-validation.
    pub fn revalidation_range(&self, from: TxnIndex) -> Vec<TxnIndex> {
        self.complete.range(from..).copied().collect()
    }

    /// Records that `blocked` cannot run until `blocker` completes.
    ///
    /// Returns whether `blocked` is now waiting on anything. A blocker that is
    /// already complete, or that does not precede `blocked`, adds nothing.
    pub fn add_dependency(&mut self, blocker: TxnIndex, blocked: TxnIndex) -> bool {
        if blocker >= blocked {
            return false;
        }

        let blockers = self.blocker.entry(blocked).or_default();
        if self.complete.contains(&blocker) {
            blockers.remove(&blocker);
            return !blockers.is_empty();
        }

        blockers.insert(blocker);
        self.dependency.entry(blocker).or_default().insert(blocked);
        true
    }

    /// Releases every transaction waiting on `tx`; those left with no blocker
    /// become runnable again.
    pub fn remove_dependency(&mut self, tx: TxnIndex) {
        let Some(dependents) = self.dependency.remove(&tx) else {
            return;
        };

        for dependent in dependents {
            if let Some(blockers) = self.blocker.get_mut(&dependent) {
                blockers.remove(&tx);
            }
        }
    }

    pub fn is_blocked(&self, tx: TxnIndex) -> bool {
        self.blocker.get(&tx).is_some_and(|blockers| !blockers.is_empty())
    }
}
