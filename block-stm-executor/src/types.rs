//! Core types for Block-STM execution.

use alloy_primitives::{Address, B256};
use std::fmt;
use std::time::Duration;

/// Transaction index in the block (0-based).
pub type TxnIndex = usize;

/// Incarnation number (how many times a transaction has been re-executed).
pub type Incarnation = usize;

/// Version identifier for a transaction execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub txn_idx: TxnIndex,
    pub incarnation: Incarnation,
}

impl Version {
    pub fn new(txn_idx: TxnIndex, incarnation: Incarnation) -> Self {
        Self { txn_idx, incarnation }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.txn_idx, self.incarnation)
    }
}

/// Account-level fields that are tracked as separate locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubPath {
    Balance,
    Nonce,
    Code,
    Suicide,
}

/// A storage location tracked by the multi-version store.
///
/// The scheduler treats keys as opaque; only equality and hashing matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// The account as a whole (existence, creation).
    Address(Address),
    /// A contract storage slot.
    State(Address, B256),
    /// A single field of an account.
    SubPath(Address, SubPath),
}

impl Key {
    pub fn address(addr: Address) -> Self {
        Key::Address(addr)
    }

    pub fn state(addr: Address, slot: B256) -> Self {
        Key::State(addr, slot)
    }

    pub fn balance(addr: Address) -> Self {
        Key::SubPath(addr, SubPath::Balance)
    }

    pub fn nonce(addr: Address) -> Self {
        Key::SubPath(addr, SubPath::Nonce)
    }

    pub fn code(addr: Address) -> Self {
        Key::SubPath(addr, SubPath::Code)
    }

    pub fn suicide(addr: Address) -> Self {
        Key::SubPath(addr, SubPath::Suicide)
    }

    /// The account this location belongs to.
    pub fn owner(&self) -> Address {
        match self {
            Key::Address(addr) | Key::State(addr, _) | Key::SubPath(addr, _) => *addr,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Address(addr) => write!(f, "Address({addr})"),
            Key::State(addr, slot) => write!(f, "State({addr}, {slot})"),
            Key::SubPath(addr, path) => write!(f, "{path:?}({addr})"),
        }
    }
}

/// Where a recorded read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadKind {
    /// Served by a lower-indexed writer in the multi-version store.
    Map(Version),
    /// No writer existed; served by the base state.
    Storage,
}

/// A read performed by one incarnation of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadDescriptor {
    pub key: Key,
    pub kind: ReadKind,
}

impl ReadDescriptor {
    pub fn new(key: Key, kind: ReadKind) -> Self {
        Self { key, kind }
    }
}

/// A write produced by one incarnation of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteDescriptor<V> {
    pub key: Key,
    pub version: Version,
    pub value: V,
}

impl<V> WriteDescriptor<V> {
    pub fn new(key: Key, version: Version, value: V) -> Self {
        Self { key, version, value }
    }
}

/// Timing of a single execution attempt, recorded when profiling is enabled.
///
/// `start` and `end` are offsets from the moment the block started executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionStat {
    pub txn_idx: TxnIndex,
    pub incarnation: Incarnation,
    pub worker: usize,
    pub start: Duration,
    pub end: Duration,
}

impl ExecutionStat {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Counters collected by one run of the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Executions dispatched to workers, including re-executions.
    pub executions: usize,
    /// Executions that completed without a conflict.
    pub successes: usize,
    /// Executions that ended in a dependency conflict.
    pub aborts: usize,
    pub validations: usize,
    pub validation_failures: usize,
}

/// Execution outcomes of a single transaction across all its incarnations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnCounters {
    pub successes: usize,
    pub aborts: usize,
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "execs={} success={} aborts={} validations={} failures={}",
            self.executions,
            self.successes,
            self.aborts,
            self.validations,
            self.validation_failures
        )
    }
}
