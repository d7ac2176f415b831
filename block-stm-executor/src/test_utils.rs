//! Scripted tasks for exercising the scheduler and executor.

use crate::error::{AbortError, ExecError};
use crate::mvhashmap::MVHashMap;
use crate::task::ExecTask;
use crate::txio::{TxnInput, TxnOutput};
use crate::types::{Incarnation, Key, TxnIndex, Version};
use crate::view::VersionedView;
use alloy_primitives::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) fn key(byte: u8) -> Key {
    Key::balance(Address::repeat_byte(byte))
}

/// What a task applied when it settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SettledTx {
    pub index: TxnIndex,
    pub writes: Vec<(Key, u64)>,
}

/// Base state and settle log shared by the tasks of one block.
#[derive(Clone, Default)]
pub(crate) struct TestEnv {
    pub base: Arc<HashMap<Key, u64>>,
    pub settled: Arc<Mutex<Vec<SettledTx>>>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: HashMap<Key, u64>) -> Self {
        Self {
            base: Arc::new(base),
            ..Default::default()
        }
    }

    pub fn settled(&self) -> Vec<SettledTx> {
        self.settled.lock().clone()
    }

    pub fn settled_indices(&self) -> Vec<TxnIndex> {
        self.settled.lock().iter().map(|tx| tx.index).collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct Conditional {
    guard: Key,
    target: Key,
    when_present: bool,
}

#[derive(Debug)]
struct ScriptError(TxnIndex);

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scripted failure in transaction {}", self.0)
    }
}

impl std::error::Error for ScriptError {}

/// A transaction that reads a fixed list of keys and writes a value derived
/// from everything it read to each of its write keys.
pub(crate) struct ScriptedTask {
    index: TxnIndex,
    sender: Address,
    reads: Vec<Key>,
    writes: Vec<Key>,
    conditional: Option<Conditional>,
    abort_once_on: Option<TxnIndex>,
    unknown_aborts: usize,
    fatal: bool,
    panics: bool,
    settle_panics: bool,
    hints: Vec<TxnIndex>,
    env: TestEnv,
    input: TxnInput,
    output: TxnOutput<u64>,
}

impl ScriptedTask {
    pub fn new(index: TxnIndex, env: &TestEnv) -> Self {
        Self {
            index,
            sender: Address::with_last_byte(index as u8),
            reads: Vec::new(),
            writes: Vec::new(),
            conditional: None,
            abort_once_on: None,
            unknown_aborts: 0,
            fatal: false,
            panics: false,
            settle_panics: false,
            hints: Vec::new(),
            env: env.clone(),
            input: Vec::new(),
            output: TxnOutput::default(),
        }
    }

    pub fn reads(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.reads.extend(keys);
        self
    }

    pub fn writes(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.writes.extend(keys);
        self
    }

    /// Writes `target` only while no lower transaction has written `guard`.
    pub fn writes_when_absent(mut self, guard: Key, target: Key) -> Self {
        self.conditional = Some(Conditional {
            guard,
            target,
            when_present: false,
        });
        self
    }

    /// Writes `target` only once a lower transaction has written `guard`.
    pub fn writes_when_present(mut self, guard: Key, target: Key) -> Self {
        self.conditional = Some(Conditional {
            guard,
            target,
            when_present: true,
        });
        self
    }

    /// Aborts the first incarnation with a dependency on `dep`.
    pub fn abort_once_on(mut self, dep: TxnIndex) -> Self {
        self.abort_once_on = Some(dep);
        self
    }

    /// Aborts the first `times` incarnations without naming a dependency.
    pub fn unknown_aborts(mut self, times: usize) -> Self {
        self.unknown_aborts = times;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn panics(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn panics_on_settle(mut self) -> Self {
        self.settle_panics = true;
        self
    }

    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = sender;
        self
    }

    pub fn hints(mut self, deps: impl IntoIterator<Item = TxnIndex>) -> Self {
        self.hints.extend(deps);
        self
    }

    fn run(
        &self,
        store: &MVHashMap<u64>,
        incarnation: Incarnation,
    ) -> Result<(TxnInput, TxnOutput<u64>), ExecError> {
        if self.panics {
            panic!("scripted panic in transaction {}", self.index);
        }
        if self.fatal {
            return Err(ExecError::fatal(ScriptError(self.index)));
        }
        if incarnation < self.unknown_aborts {
            return Err(AbortError::new(None).into());
        }
        if incarnation == 0 {
            if let Some(dep) = self.abort_once_on {
                return Err(AbortError::on(dep).into());
            }
        }

        let version = Version::new(self.index, incarnation);
        let mut view = VersionedView::new(store, &*self.env.base, version);

        let mut acc = self.index as u64;
        for key in &self.reads {
            let value = view.read(key)?.unwrap_or_default();
            acc = acc.wrapping_mul(31).wrapping_add(value);
        }
        for (offset, key) in self.writes.iter().enumerate() {
            view.write(*key, acc.wrapping_add(offset as u64 + 1));
        }
        if let Some(cond) = self.conditional {
            if view.read(&cond.guard)?.is_some() == cond.when_present {
                view.write(cond.target, acc);
            }
        }

        Ok(view.into_sets())
    }
}

impl ExecTask for ScriptedTask {
    type Value = u64;

    fn execute(
        &mut self,
        store: &MVHashMap<u64>,
        incarnation: Incarnation,
    ) -> Result<(), ExecError> {
        let (input, output) = self.run(store, incarnation)?;
        self.input = input;
        self.output = output;
        Ok(())
    }

    fn read_list(&self) -> TxnInput {
        self.input.clone()
    }

    fn write_list(&self) -> TxnOutput<u64> {
        self.output.clone()
    }

    fn full_write_list(&self) -> TxnOutput<u64> {
        self.output.clone()
    }

    fn sender(&self) -> Address {
        self.sender
    }

    fn settle(&mut self) {
        if self.settle_panics {
            panic!("scripted settle panic in transaction {}", self.index);
        }
        let writes = self.output.iter().map(|w| (w.key, w.value)).collect();
        self.env.settled.lock().push(SettledTx {
            index: self.index,
            writes,
        });
    }

    fn dependencies(&self) -> Vec<TxnIndex> {
        self.hints.clone()
    }
}
