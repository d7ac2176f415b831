//! ETH transfer transactions as executor tasks.

use crate::state::{GenesisState, Receipt, RevertReason, SettledState, StateValue, TxStatus};
use crate::SignedTransaction;
use alloy_primitives::{Address, U256};
use block_stm_executor::{
    AbortError, ExecError, ExecTask, Incarnation, Key, MVHashMap, TxnIndex, TxnInput, TxnOutput,
    Version, VersionedView,
};
use std::sync::Arc;
use thiserror::Error;

/// Errors that make a transfer invalid for the whole block.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transaction {index} from {from} has an invalid signature")]
    InvalidSignature { index: TxnIndex, from: Address },
}

/// One signed transfer, executed through a [`VersionedView`].
///
/// A transfer with a wrong nonce or too little balance reverts: it keeps its
/// reads, writes nothing and settles a reverted receipt.
#[derive(Debug)]
pub struct TransferTask {
    index: TxnIndex,
    tx: SignedTransaction,
    verify_signature: bool,
    genesis: Arc<GenesisState>,
    settled: Arc<SettledState>,
    hints: Vec<TxnIndex>,
    reads: TxnInput,
    writes: TxnOutput<StateValue>,
    status: TxStatus,
}

impl TransferTask {
    pub fn new(
        index: TxnIndex,
        tx: SignedTransaction,
        verify_signature: bool,
        genesis: Arc<GenesisState>,
        settled: Arc<SettledState>,
    ) -> Self {
        Self {
            index,
            tx,
            verify_signature,
            genesis,
            settled,
            hints: Vec::new(),
            reads: Vec::new(),
            writes: TxnOutput::default(),
            status: TxStatus::Success,
        }
    }

    /// Lower transactions this one is expected to depend on.
    pub fn with_hints(mut self, hints: Vec<TxnIndex>) -> Self {
        self.hints = hints;
        self
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    fn transfer(
        &self,
        view: &mut VersionedView<'_, StateValue, GenesisState>,
    ) -> Result<TxStatus, AbortError> {
        let from = self.tx.from;
        let nonce = read_nonce(view, from)?;
        if nonce != self.tx.nonce {
            return Ok(TxStatus::Reverted(RevertReason::NonceMismatch {
                expected: nonce,
                actual: self.tx.nonce,
            }));
        }

        let balance = read_balance(view, from)?;
        if balance < self.tx.value {
            return Ok(TxStatus::Reverted(RevertReason::InsufficientBalance {
                balance,
                value: self.tx.value,
            }));
        }

        view.write(Key::nonce(from), StateValue::Nonce(nonce + 1));
        view.write(Key::balance(from), StateValue::Balance(balance - self.tx.value));

        // Read after the debit so a self-transfer nets out
        let to = self.tx.to;
        let receiver = read_balance(view, to)?;
        view.write(Key::balance(to), StateValue::Balance(receiver + self.tx.value));

        Ok(TxStatus::Success)
    }
}

fn read_nonce(
    view: &mut VersionedView<'_, StateValue, GenesisState>,
    address: Address,
) -> Result<u64, AbortError> {
    let nonce = view.read(&Key::nonce(address))?.and_then(|value| value.nonce());
    Ok(nonce.unwrap_or(0))
}

fn read_balance(
    view: &mut VersionedView<'_, StateValue, GenesisState>,
    address: Address,
) -> Result<U256, AbortError> {
    Ok(view
        .read(&Key::balance(address))?
        .and_then(|value| value.balance())
        .unwrap_or(U256::ZERO))
}

impl ExecTask for TransferTask {
    type Value = StateValue;

    fn execute(
        &mut self,
        store: &MVHashMap<StateValue>,
        incarnation: Incarnation,
    ) -> Result<(), ExecError> {
        if self.verify_signature && !self.tx.verify() {
            return Err(ExecError::fatal(TransferError::InvalidSignature {
                index: self.index,
                from: self.tx.from,
            }));
        }

        let version = Version::new(self.index, incarnation);
        let mut view = VersionedView::new(store, &*self.genesis, version);
        let status = self.transfer(&mut view)?;
        let (reads, writes) = view.into_sets();

        self.status = status;
        self.reads = reads;
        self.writes = if status.is_success() { writes } else { TxnOutput::default() };
        Ok(())
    }

    fn read_list(&self) -> TxnInput {
        self.reads.clone()
    }

    fn write_list(&self) -> TxnOutput<StateValue> {
        self.writes.clone()
    }

    fn full_write_list(&self) -> TxnOutput<StateValue> {
        self.writes.clone()
    }

    fn sender(&self) -> Address {
        self.tx.from
    }

    fn settle(&mut self) {
        let receipt = Receipt {
            index: self.index,
            from: self.tx.from,
            to: self.tx.to,
            status: self.status,
        };
        self.settled.commit(&self.writes, receipt);
    }

    fn dependencies(&self) -> Vec<TxnIndex> {
        self.hints.clone()
    }
}
