//! Sequential transaction executor.
//!
//! This module provides a baseline sequential executor that processes
//! transactions one at a time with optional signature verification.

use super::{run_workload, ExecutionResult, Executor, FinalState};
use crate::Workload;
use block_stm_executor::{execute_sequential, BlockStmError};

/// Sequential executor that processes transactions one at a time.
///
/// This is the baseline executor that processes transactions in order,
/// verifying signatures and executing each transaction before moving to the next.
///
/// # Example
///
/// ```
/// use blockstm_bench::{Executor, SequentialExecutor, Workload, WorkloadConfig};
///
/// let config = WorkloadConfig::default();
/// let workload = Workload::generate(config);
///
/// let executor = SequentialExecutor::new(true); // with signature verification
/// let (_state, result) = executor.execute(&workload).unwrap();
///
/// println!("Successful: {}, Failed: {}", result.successful, result.failed);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SequentialExecutor {
    /// Whether to verify signatures during execution.
    pub verify_signatures: bool,
}

impl SequentialExecutor {
    /// Creates a new sequential executor.
    ///
    /// # Arguments
    /// * `verify_signatures` - If true, recovers and verifies the signer address
    ///   from each transaction's signature before execution.
    pub fn new(verify_signatures: bool) -> Self {
        Self { verify_signatures }
    }
}

impl Executor for SequentialExecutor {
    fn execute(&self, workload: &Workload) -> Result<(FinalState, ExecutionResult), BlockStmError> {
        run_workload(workload, self.verify_signatures, false, |tasks| execute_sequential(tasks))
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}
