//! Transaction execution strategies.
//!
//! This module provides the [`Executor`] trait and implementations for
//! different transaction execution strategies. Every strategy executes the
//! block in strict order semantics: transactions may run concurrently, but
//! the post-block state is always the one of in-order execution.

mod block_stm;
mod sequential;

pub use block_stm::BlockStmExecutor;
pub use sequential::SequentialExecutor;

use crate::state::{AccountState, SettledState, StateValue};
use crate::transfer::TransferTask;
use crate::Workload;
use alloy_primitives::Address;
use block_stm_executor::{BlockStmError, ExecutionSummary, ParallelExecutionResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of executing a workload.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Number of transfers that moved value.
    pub successful: usize,
    /// Number of transfers that reverted (bad nonce or insufficient balance).
    pub failed: usize,
    /// Scheduler counters for the run.
    pub summary: ExecutionSummary,
}

impl ExecutionResult {
    /// Creates a new execution result.
    pub fn new(successful: usize, failed: usize) -> Self {
        Self {
            successful,
            failed,
            summary: ExecutionSummary::default(),
        }
    }

    /// Total number of transactions processed.
    pub fn total(&self) -> usize {
        self.successful + self.failed
    }
}

/// Post-block account state.
pub type FinalState = HashMap<Address, AccountState>;

/// Trait for different transaction execution strategies.
///
/// This allows benchmarking different approaches to executing the same
/// workload and checking that they agree on the final state.
pub trait Executor {
    /// Executes the workload from its genesis state.
    ///
    /// # Returns
    /// A tuple of (final account state, execution result).
    fn execute(&self, workload: &Workload) -> Result<(FinalState, ExecutionResult), BlockStmError>;

    /// Returns a human-readable name for this executor.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Builds the tasks of a workload, runs them with `run` and collects the
/// settled state.
fn run_workload<F>(
    workload: &Workload,
    verify_signatures: bool,
    with_hints: bool,
    run: F,
) -> Result<(FinalState, ExecutionResult), BlockStmError>
where
    F: FnOnce(&mut [TransferTask]) -> Result<ParallelExecutionResult<StateValue>, BlockStmError>,
{
    let genesis = Arc::new(workload.genesis());
    let settled = Arc::new(SettledState::from_genesis(&genesis));
    let mut tasks = workload.tasks(verify_signatures, with_hints, &genesis, &settled);

    let outcome = run(&mut tasks)?;

    let receipts = settled.receipts();
    let successful = receipts.iter().filter(|receipt| receipt.status.is_success()).count();
    let result = ExecutionResult {
        successful,
        failed: receipts.len() - successful,
        summary: outcome.summary,
    };

    Ok((settled.accounts(), result))
}
