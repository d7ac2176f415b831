//! Error types for task execution and for a parallel run.

use crate::types::TxnIndex;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed error produced by a transaction body.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A transaction observed state that is still being produced by another
/// transaction and must be executed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortError {
    /// Index of the transaction whose result is needed, when known.
    pub dependency: Option<TxnIndex>,
}

impl AbortError {
    pub fn new(dependency: Option<TxnIndex>) -> Self {
        Self { dependency }
    }

    pub fn on(dependency: TxnIndex) -> Self {
        Self::new(Some(dependency))
    }
}

impl fmt::Display for AbortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dependency {
            Some(dep) => write!(f, "execution aborted due to dependency {dep}"),
            None => write!(f, "execution aborted"),
        }
    }
}

impl StdError for AbortError {}

/// Error returned by [`ExecTask::execute`](crate::ExecTask::execute).
#[derive(Debug, Error)]
pub enum ExecError {
    /// Recoverable conflict; the scheduler re-runs the transaction.
    #[error(transparent)]
    Abort(#[from] AbortError),
    /// Anything else; halts the whole block.
    #[error("fatal execution error: {0}")]
    Fatal(#[source] BoxError),
}

impl ExecError {
    pub fn fatal(err: impl Into<BoxError>) -> Self {
        ExecError::Fatal(err.into())
    }
}

/// Error returned to the caller of a parallel run. No partial result is ever
/// returned alongside one of these; the caller must reject the block or
/// execute it sequentially.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlockStmError {
    /// A transaction failed with an error that is not a dependency conflict.
    #[error("transaction {txn_idx} failed: {source}")]
    Execution {
        txn_idx: TxnIndex,
        #[source]
        source: BoxError,
    },
    /// A transaction body panicked.
    #[error("transaction {txn_idx} panicked during execution")]
    TaskPanicked { txn_idx: TxnIndex },
    /// Work remains but nothing is runnable or in flight.
    #[error("scheduler stalled with {pending} pending and {complete} complete transactions")]
    Stalled { pending: usize, complete: usize },
    /// A dependency conflict during sequential execution, where every lower
    /// transaction is already final.
    #[error("transaction {txn_idx} aborted during sequential execution")]
    UnexpectedAbort { txn_idx: TxnIndex },
}
