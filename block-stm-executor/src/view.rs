//! Per-incarnation view of the multi-version store.
//!
//! Task implementations read and write through a [`VersionedView`]: reads
//! resolve against lower-indexed writers, falling back to the pre-block
//! [`BaseState`], and every resolved read is recorded so the scheduler can
//! validate it later. Writes stay in the view until the incarnation finishes.

use crate::error::AbortError;
use crate::mvhashmap::{MVHashMap, ReadResult};
use crate::txio::{TxnInput, TxnOutput};
use crate::types::{Key, ReadDescriptor, ReadKind, Version, WriteDescriptor};
use std::collections::{BTreeMap, HashMap};

/// Supplies the pre-block value of a key that no transaction has written.
pub trait BaseState<V>: Send + Sync {
    fn get(&self, key: &Key) -> Option<V>;
}

impl<V: Clone + Send + Sync> BaseState<V> for HashMap<Key, V> {
    fn get(&self, key: &Key) -> Option<V> {
        HashMap::get(self, key).cloned()
    }
}

/// Read/write recorder for one incarnation of one transaction.
pub struct VersionedView<'a, V, B: ?Sized> {
    store: &'a MVHashMap<V>,
    base: &'a B,
    version: Version,
    reads: TxnInput,
    observed: HashMap<Key, Option<V>>,
    writes: BTreeMap<Key, V>,
}

impl<'a, V: Clone, B: BaseState<V> + ?Sized> VersionedView<'a, V, B> {
    pub fn new(store: &'a MVHashMap<V>, base: &'a B, version: Version) -> Self {
        Self {
            store,
            base,
            version,
            reads: Vec::new(),
            observed: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Reads `key` as seen by this incarnation.
    ///
    /// Repeated reads of a key return the first observed value, and a key the
    /// view already wrote returns that write. Hitting an estimate marker aborts
    /// the incarnation with a dependency on the marker's writer.
    pub fn read(&mut self, key: &Key) -> Result<Option<V>, AbortError> {
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = self.observed.get(key) {
            return Ok(value.clone());
        }

        let (kind, value) = match self.store.read(key, self.version.txn_idx) {
            ReadResult::Dependency(dep) => return Err(AbortError::on(dep)),
            ReadResult::Versioned(version, value) => (ReadKind::Map(version), Some(value)),
            ReadResult::Storage => (ReadKind::Storage, self.base.get(key)),
        };

        self.reads.push(ReadDescriptor::new(*key, kind));
        self.observed.insert(*key, value.clone());
        Ok(value)
    }

    pub fn write(&mut self, key: Key, value: V) {
        self.writes.insert(key, value);
    }

    /// Consumes the view, returning its read set and its writes ordered by key.
    pub fn into_sets(self) -> (TxnInput, TxnOutput<V>) {
        let version = self.version;
        let writes = self
            .writes
            .into_iter()
            .map(|(key, value)| WriteDescriptor::new(key, version, value))
            .collect();
        (self.reads, TxnOutput::new(writes))
    }
}
