//! The capability set the executor needs from a transaction.

use crate::error::ExecError;
use crate::mvhashmap::MVHashMap;
use crate::txio::{TxnInput, TxnOutput};
use crate::types::{Incarnation, TxnIndex};
use alloy_primitives::Address;

/// A transaction body the executor can run speculatively.
///
/// The executor never runs two incarnations of the same task at once, and
/// calls `settle` exactly once, after the final incarnation has been validated
/// and after every lower-indexed task has settled.
pub trait ExecTask: Send {
    /// Value type stored in the multi-version store.
    type Value: Clone + Send + Sync;

    /// Runs one incarnation against the store.
    ///
    /// Reads go through the store; writes are kept by the task and published
    /// by the executor from [`full_write_list`](Self::full_write_list) once the
    /// incarnation succeeds.
    fn execute(
        &mut self,
        store: &MVHashMap<Self::Value>,
        incarnation: Incarnation,
    ) -> Result<(), ExecError>;

    /// Reads performed by the last executed incarnation.
    fn read_list(&self) -> TxnInput;

    /// Effective writes of the last executed incarnation.
    fn write_list(&self) -> TxnOutput<Self::Value>;

    /// Every location the last executed incarnation wrote, including writes
    /// it later reverted.
    fn full_write_list(&self) -> TxnOutput<Self::Value>;

    /// Account that sent the transaction.
    fn sender(&self) -> Address;

    /// Applies the finalized effects.
    fn settle(&mut self);

    /// Lower-indexed transactions known in advance to conflict with this one.
    fn dependencies(&self) -> Vec<TxnIndex> {
        Vec::new()
    }
}

impl<T: ExecTask + ?Sized> ExecTask for Box<T> {
    type Value = T::Value;

    fn execute(
        &mut self,
        store: &MVHashMap<Self::Value>,
        incarnation: Incarnation,
    ) -> Result<(), ExecError> {
        (**self).execute(store, incarnation)
    }

    fn read_list(&self) -> TxnInput {
        (**self).read_list()
    }

    fn write_list(&self) -> TxnOutput<Self::Value> {
        (**self).write_list()
    }

    fn full_write_list(&self) -> TxnOutput<Self::Value> {
        (**self).full_write_list()
    }

    fn sender(&self) -> Address {
        (**self).sender()
    }

    fn settle(&mut self) {
        (**self).settle()
    }

    fn dependencies(&self) -> Vec<TxnIndex> {
        (**self).dependencies()
    }
}
