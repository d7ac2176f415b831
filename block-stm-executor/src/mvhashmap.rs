//! Multi-version hashmap for storing versioned writes.
//!
//! This is the core data structure that enables parallel execution with
//! optimistic concurrency control. For each key, it stores one entry per
//! writing transaction, so that a transaction can read the most recent write
//! of any lower-indexed transaction while that write is still speculative.
//!
//! Keys live in a [`DashMap`] whose values are per-key [`RwLock`]s. The map's
//! shard lock is only held long enough to clone the per-key handle, so
//! operations on distinct keys never wait on each other, and operations on
//! the same key are serialized by that key's lock.

use crate::txio::{TxnInputOutput, TxnOutput};
use crate::types::{Incarnation, Key, ReadKind, TxnIndex, Version};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// State of one transaction's entry for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFlag {
    /// The write of an executed incarnation.
    Done,
    /// The writer failed validation; readers must wait for its next incarnation.
    Estimate,
}

/// Entry in the version history of a key.
#[derive(Debug, Clone)]
pub struct WriteCell<V> {
    pub flag: CellFlag,
    pub incarnation: Incarnation,
    pub value: V,
}

/// Version history of one key, ordered by writer index.
type TxnIndexCells<V> = BTreeMap<TxnIndex, WriteCell<V>>;

/// Result of reading from the MVHashMap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult<V> {
    /// Value written by the highest lower-indexed writer.
    Versioned(Version, V),
    /// No lower-indexed writer, should read from base storage.
    Storage,
    /// The highest lower-indexed writer is marked as an estimate.
    Dependency(TxnIndex),
}

/// Multi-version hashmap storing versioned values.
///
/// Structure: Key -> RwLock<BTreeMap<TxnIndex -> WriteCell>>
///
/// The BTreeMap is keyed by TxnIndex for efficient range queries to find
/// the latest version written by a transaction with index < reader index.
pub struct MVHashMap<V> {
    data: DashMap<Key, Arc<RwLock<TxnIndexCells<V>>>>,
}

impl<V: Clone> MVHashMap<V> {
    /// Creates a new empty multi-version hashmap.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    fn cells(&self, key: &Key) -> Option<Arc<RwLock<TxnIndexCells<V>>>> {
        self.data.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn cells_or_default(&self, key: &Key) -> Arc<RwLock<TxnIndexCells<V>>> {
        Arc::clone(self.data.entry(*key).or_default().value())
    }

    /// Reads the latest version of `key` visible to `txn_idx`.
    ///
    /// Returns:
    /// - `ReadResult::Versioned` if a lower transaction wrote the key
    /// - `ReadResult::Storage` if no lower transaction wrote it
    /// - `ReadResult::Dependency` if the closest lower write is an estimate
    pub fn read(&self, key: &Key, txn_idx: TxnIndex) -> ReadResult<V> {
        let Some(cells) = self.cells(key) else {
            return ReadResult::Storage;
        };
        let cells = cells.read();

        match cells.range(..txn_idx).next_back() {
            None => ReadResult::Storage,
            Some((&writer, cell)) => match cell.flag {
                CellFlag::Estimate => ReadResult::Dependency(writer),
                CellFlag::Done => ReadResult::Versioned(
                    Version::new(writer, cell.incarnation),
                    cell.value.clone(),
                ),
            },
        }
    }

    /// Writes `value` for `key` at `version`, replacing any earlier
    /// incarnation of the same transaction.
    pub fn write(&self, key: Key, version: Version, value: V) {
        let cells = self.cells_or_default(&key);
        let mut cells = cells.write();

        if let Some(existing) = cells.get(&version.txn_idx) {
            debug_assert!(
                existing.incarnation <= version.incarnation,
                "existing write of {} has a higher incarnation than {}",
                key,
                version
            );
        }

        cells.insert(
            version.txn_idx,
            WriteCell {
                flag: CellFlag::Done,
                incarnation: version.incarnation,
                value,
            },
        );
    }

    /// Writes every entry of an output.
    pub fn flush_write_set(&self, output: &TxnOutput<V>) {
        for w in output {
            self.write(w.key, w.version, w.value.clone());
        }
    }

    /// Turns the entry written by `txn_idx` into an estimate marker.
    pub fn mark_estimate(&self, key: &Key, txn_idx: TxnIndex) {
        let Some(cells) = self.cells(key) else {
            warn!(%key, txn_idx, "estimate requested for an unknown key");
            return;
        };

        let mut cells = cells.write();
        match cells.get_mut(&txn_idx) {
            Some(cell) => cell.flag = CellFlag::Estimate,
            None => warn!(%key, txn_idx, "estimate requested for a missing write"),
        }
    }

    /// Removes the entry written by `txn_idx`.
    pub fn delete(&self, key: &Key, txn_idx: TxnIndex) {
        if let Some(cells) = self.cells(key) {
            cells.write().remove(&txn_idx);
        }
    }

    /// Returns the entry written by `txn_idx` for `key`, if any.
    pub fn entry(&self, key: &Key, txn_idx: TxnIndex) -> Option<WriteCell<V>> {
        self.cells(key)?.read().get(&txn_idx).cloned()
    }

    /// Number of estimate markers currently stored.
    pub fn estimate_count(&self) -> usize {
        self.data
            .iter()
            .map(|entry| {
                entry
                    .value()
                    .read()
                    .values()
                    .filter(|cell| cell.flag == CellFlag::Estimate)
                    .count()
            })
            .sum()
    }

    /// Number of keys that have ever been written.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<V: Clone> Default for MVHashMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks that every read recorded for `txn_idx` still resolves to the same
/// origin in the store.
pub fn validate_version<V: Clone>(
    txn_idx: TxnIndex,
    txio: &TxnInputOutput<V>,
    store: &MVHashMap<V>,
) -> bool {
    txio.read_set(txn_idx).iter().all(|rd| {
        match (store.read(&rd.key, txn_idx), rd.kind) {
            (ReadResult::Versioned(version, _), ReadKind::Map(expected)) => version == expected,
            (ReadResult::Storage, ReadKind::Storage) => true,
            _ => false,
        }
    })
}
