//! Read and write sets of the latest incarnation of every transaction.

use crate::types::{Key, ReadDescriptor, TxnIndex, WriteDescriptor};
use std::collections::HashSet;

/// Reads performed by one incarnation.
pub type TxnInput = Vec<ReadDescriptor>;

/// Writes produced by one incarnation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnOutput<V>(pub Vec<WriteDescriptor<V>>);

impl<V> Default for TxnOutput<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> TxnOutput<V> {
    pub fn new(writes: Vec<WriteDescriptor<V>>) -> Self {
        Self(writes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WriteDescriptor<V>> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.0.iter().map(|w| &w.key)
    }

    /// Returns true if this output writes a key that `previous` did not.
    pub fn has_new_write(&self, previous: &TxnOutput<V>) -> bool {
        if self.is_empty() {
            return false;
        }
        if previous.is_empty() || self.len() > previous.len() {
            return true;
        }

        let seen: HashSet<&Key> = previous.keys().collect();
        self.keys().any(|key| !seen.contains(key))
    }
}

impl<'a, V> IntoIterator for &'a TxnOutput<V> {
    type Item = &'a WriteDescriptor<V>;
    type IntoIter = std::slice::Iter<'a, WriteDescriptor<V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Inputs and outputs of the latest incarnation of every transaction in a block.
///
/// Only the scheduler's control loop mutates this, so it carries no locking.
#[derive(Debug, Clone)]
pub struct TxnInputOutput<V> {
    inputs: Vec<TxnInput>,
    outputs: Vec<TxnOutput<V>>,
    all_outputs: Vec<TxnOutput<V>>,
}

impl<V> TxnInputOutput<V> {
    pub fn new(num_txns: usize) -> Self {
        Self {
            inputs: (0..num_txns).map(|_| Vec::new()).collect(),
            outputs: (0..num_txns).map(|_| TxnOutput::default()).collect(),
            all_outputs: (0..num_txns).map(|_| TxnOutput::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn read_set(&self, txn_idx: TxnIndex) -> &TxnInput {
        &self.inputs[txn_idx]
    }

    pub fn write_set(&self, txn_idx: TxnIndex) -> &TxnOutput<V> {
        &self.outputs[txn_idx]
    }

    /// Every location the latest incarnation wrote to the store, including
    /// writes the transaction itself reverted.
    pub fn all_write_set(&self, txn_idx: TxnIndex) -> &TxnOutput<V> {
        &self.all_outputs[txn_idx]
    }

    pub fn record_read(&mut self, txn_idx: TxnIndex, input: TxnInput) {
        self.inputs[txn_idx] = input;
    }

    pub fn record_write(&mut self, txn_idx: TxnIndex, output: TxnOutput<V>) {
        self.outputs[txn_idx] = output;
    }

    pub fn record_all_write(&mut self, txn_idx: TxnIndex, output: TxnOutput<V>) {
        self.all_outputs[txn_idx] = output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Version;
    use alloy_primitives::Address;

    fn output(keys: &[Key]) -> TxnOutput<u64> {
        TxnOutput::new(
            keys.iter()
                .map(|key| WriteDescriptor::new(*key, Version::new(0, 0), 1))
                .collect(),
        )
    }

    #[test]
    fn test_has_new_write() {
        let a = Key::balance(Address::repeat_byte(1));
        let b = Key::balance(Address::repeat_byte(2));
        let c = Key::nonce(Address::repeat_byte(1));

        assert!(!output(&[]).has_new_write(&output(&[a])));
        assert!(output(&[a]).has_new_write(&output(&[])));
        assert!(output(&[a, b]).has_new_write(&output(&[a])));
        assert!(!output(&[a]).has_new_write(&output(&[a, b])));
        assert!(output(&[c]).has_new_write(&output(&[a])));
        assert!(!output(&[b, a]).has_new_write(&output(&[a, b])));
    }

    #[test]
    fn test_records_latest_incarnation_only() {
        let key = Key::balance(Address::repeat_byte(1));
        let mut txio = TxnInputOutput::new(2);

        txio.record_write(1, output(&[key]));
        txio.record_write(1, output(&[]));

        assert!(txio.write_set(1).is_empty());
        assert!(txio.write_set(0).is_empty());
        assert_eq!(txio.len(), 2);
    }
}
