//! Block-STM parallel executor for blockchain transactions.
//!
//! This crate executes an ordered block of transactions speculatively in
//! parallel while producing exactly the result of executing them one after
//! another. It uses optimistic concurrency control: every execution records
//! what it read, reads are validated once all lower transactions have
//! executed, and transactions whose reads went stale are executed again.
//!
//! # Core Components
//!
//! - **MVHashMap**: Multi-version store holding one entry per writer for every key
//! - **VersionedView**: Per-execution read/write recorder over the store
//! - **Scheduler**: Single-owner state machine deciding what runs, validates and settles
//! - **ParallelExecutor**: Worker lanes, ordered result consumption and settlement
//!
//! # Algorithm Overview
//!
//! 1. Transactions are executed speculatively in parallel
//! 2. A read of a location being rewritten by a lower transaction aborts the
//!    reader with a dependency on that writer
//! 3. Once every lower transaction has executed, a transaction's reads are
//!    validated against the store
//! 4. A failed validation turns the transaction's writes into estimate
//!    markers and schedules its next incarnation
//! 5. Validated transactions are staged for settlement in index order and
//!    settled once the whole block has validated; a block that fails settles
//!    nothing
//!
//! # Example
//!
//! ```rust,ignore
//! use block_stm_executor::{ExecutorConfig, ParallelExecutor};
//!
//! let executor = ParallelExecutor::new(ExecutorConfig::default());
//! let mut tasks = vec![/* ExecTask implementations */];
//! let result = executor.execute(&mut tasks)?;
//!
//! println!("{}", result.summary);
//! ```

pub mod dag;
pub mod error;
pub mod executor;
pub mod mvhashmap;
pub mod queue;
pub mod scheduler;
pub mod status;
pub mod task;
pub mod txio;
pub mod types;
pub mod view;

#[cfg(test)]
mod test_utils;

pub use error::{AbortError, BlockStmError, BoxError, ExecError};
pub use executor::{
    execute_parallel, execute_sequential, ExecutorConfig, ParallelExecutionResult, ParallelExecutor,
};
pub use mvhashmap::{MVHashMap, ReadResult};
pub use task::ExecTask;
pub use txio::{TxnInput, TxnInputOutput, TxnOutput};
pub use types::{
    ExecutionStat, ExecutionSummary, Incarnation, Key, ReadDescriptor, ReadKind, SubPath,
    TxnCounters, TxnIndex, Version, WriteDescriptor,
};
pub use view::{BaseState, VersionedView};
