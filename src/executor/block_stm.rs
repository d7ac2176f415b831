//! Block-STM parallel executor wrapper.
//!
//! This module wraps the block-stm-executor crate, implementing the Executor
//! trait for use in benchmarks.

use super::{run_workload, ExecutionResult, Executor, FinalState};
use crate::Workload;
use block_stm_executor::{BlockStmError, ExecutorConfig, ParallelExecutor};

/// Block-STM parallel executor.
///
/// This executor uses optimistic concurrency control with read-set validation
/// to execute transactions in parallel while preserving strict ordering.
#[derive(Debug, Clone, Default)]
pub struct BlockStmExecutor {
    pub config: ExecutorConfig,
    pub verify_signatures: bool,
}

impl BlockStmExecutor {
    /// Creates a new Block-STM executor with the given engine configuration.
    pub fn new(config: ExecutorConfig, verify_signatures: bool) -> Self {
        Self {
            config,
            verify_signatures,
        }
    }

    /// Creates an executor with the default lane sizes.
    pub fn with_verification(verify_signatures: bool) -> Self {
        Self::new(ExecutorConfig::default(), verify_signatures)
    }
}

impl Executor for BlockStmExecutor {
    fn execute(&self, workload: &Workload) -> Result<(FinalState, ExecutionResult), BlockStmError> {
        let executor = ParallelExecutor::new(self.config);
        run_workload(
            workload,
            self.verify_signatures,
            self.config.use_dependency_hints,
            |tasks| executor.execute(tasks),
        )
    }

    fn name(&self) -> &'static str {
        "block_stm_parallel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SequentialExecutor;
    use crate::{Account, SignedTransaction, WorkloadConfig};
    use alloy_primitives::U256;

    #[test]
    fn test_block_stm_executor() {
        let executor = BlockStmExecutor::with_verification(true);

        let config = WorkloadConfig {
            num_accounts: 10,
            num_transactions: 20,
            conflict_factor: 0.0,
            seed: 42,
            chain_id: 1,
        };

        let workload = Workload::generate(config);

        let (_, result) = executor.execute(&workload).unwrap();

        assert_eq!(result.successful, 20);
        assert_eq!(result.failed, 0);
    }

    #[test]
    fn test_matches_sequential_under_conflicts() {
        let runs = [(0.0, false), (0.5, false), (1.0, false), (1.0, true)];
        for (conflict_factor, use_dependency_hints) in runs {
            let workload = Workload::generate(WorkloadConfig {
                num_accounts: 50,
                num_transactions: 200,
                conflict_factor,
                seed: 11,
                chain_id: 1,
            });

            let (expected, expected_result) =
                SequentialExecutor::new(false).execute(&workload).unwrap();

            let config = ExecutorConfig {
                use_dependency_hints,
                ..Default::default()
            };
            let (state, result) = BlockStmExecutor::new(config, false).execute(&workload).unwrap();

            assert_eq!(state, expected, "conflict factor {conflict_factor}");
            assert_eq!(result.successful, expected_result.successful);
            assert_eq!(result.failed, expected_result.failed);
        }
    }

    #[test]
    fn test_invalid_signature_fails_block() {
        let mut workload = Workload::generate(WorkloadConfig {
            num_accounts: 10,
            num_transactions: 10,
            ..Default::default()
        });
        let stranger = Account::from_seed(999);
        workload.transactions[4] = SignedTransaction {
            from: workload.accounts[0].address,
            ..SignedTransaction::new(&stranger, workload.accounts[1].address, U256::from(1), 0, 1)
        };

        let err = BlockStmExecutor::with_verification(true).execute(&workload).unwrap_err();

        assert!(matches!(err, BlockStmError::Execution { txn_idx: 4, .. }), "{err}");
    }
}
