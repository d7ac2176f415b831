//! Parallel transaction executor with Block-STM.
//!
//! A run uses a fixed pool of scoped worker threads split into two lanes.
//! Priority workers take the single lowest runnable transaction, the one
//! right after the validated prefix; speculative workers take everything else
//! from a shared min-queue. All scheduling decisions happen on the calling
//! thread, which consumes results in index order. A dedicated thread stages
//! validated transactions in block order and settles them only once the whole
//! block has validated, so a failed block settles nothing.

use crate::dag::{get_dep, Dag};
use crate::error::{BlockStmError, ExecError};
use crate::mvhashmap::MVHashMap;
use crate::queue::PriorityQueue;
use crate::scheduler::{Dispatch, ExecOutcome, ExecResult, FinalSchedule, Scheduler, TaskSets};
use crate::task::ExecTask;
use crate::txio::TxnInputOutput;
use crate::types::{
    ExecutionStat, ExecutionSummary, Incarnation, TxnCounters, TxnIndex, Version,
};
use alloy_primitives::Address;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for parallel execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Workers serving the priority lane.
    pub num_priority_workers: usize,
    /// Workers serving the speculative lane.
    pub num_speculative_workers: usize,
    /// Record per-execution timings and report the dependency graph.
    pub profile: bool,
    /// Seed the scheduler from [`ExecTask::dependencies`] instead of chaining
    /// transactions from the same sender.
    pub use_dependency_hints: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_priority_workers: 2,
            num_speculative_workers: 8,
            profile: false,
            use_dependency_hints: false,
        }
    }
}

/// Result of parallel block execution.
#[derive(Debug, Clone)]
pub struct ParallelExecutionResult<V> {
    /// Read and write sets of the final incarnation of every transaction.
    pub txio: TxnInputOutput<V>,
    /// Incarnation that produced the final result of every transaction.
    pub incarnations: Vec<Incarnation>,
    /// Successful and aborted executions of every transaction.
    pub txn_counters: Vec<TxnCounters>,
    /// Every execution attempt, in the order results were consumed. Only
    /// recorded when profiling.
    pub stats: Vec<ExecutionStat>,
    /// Read-after-write dependencies between final incarnations. Only
    /// computed when profiling.
    pub deps: BTreeMap<TxnIndex, Vec<TxnIndex>>,
    pub summary: ExecutionSummary,
}

impl<V> ParallelExecutionResult<V> {
    fn empty() -> Self {
        Self {
            txio: TxnInputOutput::new(0),
            incarnations: Vec::new(),
            txn_counters: Vec::new(),
            stats: Vec::new(),
            deps: BTreeMap::new(),
            summary: ExecutionSummary::default(),
        }
    }
}

/// Parallel Block-STM executor.
#[derive(Debug, Clone, Default)]
pub struct ParallelExecutor {
    config: ExecutorConfig,
}

/// Result sent from a worker back to the control loop, ordered by version.
struct WorkerOutput<V> {
    result: ExecResult<V>,
    stat: Option<ExecutionStat>,
}

impl<V> PartialEq for WorkerOutput<V> {
    fn eq(&self, other: &Self) -> bool {
        self.result.version == other.result.version
    }
}

impl<V> Eq for WorkerOutput<V> {}

impl<V> PartialOrd for WorkerOutput<V> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<V> Ord for WorkerOutput<V> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.result.version.cmp(&other.result.version)
    }
}

/// State shared by every thread of one run.
struct Shared<'a, T: ExecTask> {
    tasks: Vec<Mutex<&'a mut T>>,
    store: MVHashMap<T::Value>,
    speculative: PriorityQueue<Version>,
    halted: AtomicBool,
    started: Instant,
    profile: bool,
}

impl<T: ExecTask> Shared<'_, T> {
    fn run(&self, version: Version, worker: usize) -> WorkerOutput<T::Value> {
        let start = self.started.elapsed();
        let result = {
            let mut task = self.tasks[version.txn_idx].lock();
            run_version(&mut **task, &self.store, version)
        };

        let stat = self.profile.then(|| ExecutionStat {
            txn_idx: version.txn_idx,
            incarnation: version.incarnation,
            worker,
            start,
            end: self.started.elapsed(),
        });

        WorkerOutput { result, stat }
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }
}

/// Sending half of the lanes and the settle stream, owned by the control loop.
struct Dispatcher {
    priority: Sender<Version>,
    speculative: Sender<()>,
    settle: Sender<TxnIndex>,
}

impl Dispatcher {
    fn send<T: ExecTask>(&self, shared: &Shared<'_, T>, dispatch: Dispatch) -> bool {
        for tx in dispatch.settle {
            if self.settle.send(tx).is_err() {
                return false;
            }
        }
        if let Some(version) = dispatch.priority {
            if self.priority.send(version).is_err() {
                return false;
            }
        }
        for version in dispatch.speculative {
            shared.speculative.push(version);
            if self.speculative.send(()).is_err() {
                return false;
            }
        }
        true
    }
}

impl ParallelExecutor {
    /// Creates a new parallel executor.
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes a block of tasks, settling each one exactly once and in
    /// index order.
    ///
    /// Settlement only starts once every transaction has validated. If any
    /// transaction fails, the error is returned and no task is settled.
    pub fn execute<T: ExecTask>(
        &self,
        tasks: &mut [T],
    ) -> Result<ParallelExecutionResult<T::Value>, BlockStmError> {
        self.execute_checked(tasks, |_| {})
    }

    /// Like [`execute`](Self::execute), running `check` against the scheduler
    /// after every step of the control loop.
    #[cfg(test)]
    pub(crate) fn execute_with_check<T: ExecTask>(
        &self,
        tasks: &mut [T],
        check: impl FnMut(&Scheduler<T::Value>),
    ) -> Result<ParallelExecutionResult<T::Value>, BlockStmError> {
        self.execute_checked(tasks, check)
    }

    fn execute_checked<T: ExecTask>(
        &self,
        tasks: &mut [T],
        mut check: impl FnMut(&Scheduler<T::Value>),
    ) -> Result<ParallelExecutionResult<T::Value>, BlockStmError> {
        let num_txns = tasks.len();
        if num_txns == 0 {
            return Ok(ParallelExecutionResult::empty());
        }

        let mut scheduler = Scheduler::new(num_txns);
        scheduler
            .seed_dependencies(initial_dependencies(tasks, self.config.use_dependency_hints));

        let num_priority = self.config.num_priority_workers.max(1);
        let num_speculative = self.config.num_speculative_workers.max(1);

        let shared = Shared {
            tasks: tasks.iter_mut().map(Mutex::new).collect(),
            store: MVHashMap::new(),
            speculative: PriorityQueue::with_capacity(num_txns),
            halted: AtomicBool::new(false),
            started: Instant::now(),
            profile: self.config.profile,
        };
        let mut stats = Vec::new();

        debug!(num_txns, num_priority, num_speculative, "starting parallel execution");

        let outcome = thread::scope(|s| {
            let (priority_tx, priority_rx) = channel::bounded::<Version>(num_txns);
            let (speculative_tx, speculative_rx) = channel::bounded::<()>(num_txns);
            // Carries every index exactly once, so the consumer never blocks the loop.
            let (settle_tx, settle_rx) = channel::bounded::<TxnIndex>(num_txns);
            let (results_tx, results_rx) = channel::bounded(num_txns);

            for worker in 0..num_priority {
                let (lane, results, shared) = (priority_rx.clone(), results_tx.clone(), &shared);
                s.spawn(move || {
                    for version in lane {
                        if shared.is_halted() {
                            continue;
                        }
                        if results.send(shared.run(version, worker)).is_err() {
                            break;
                        }
                    }
                });
            }

            for worker in num_priority..num_priority + num_speculative {
                let (lane, results, shared) =
                    (speculative_rx.clone(), results_tx.clone(), &shared);
                s.spawn(move || {
                    for () in lane {
                        let Some(version) = shared.speculative.pop() else {
                            continue;
                        };
                        if shared.is_halted() {
                            continue;
                        }
                        if results.send(shared.run(version, worker)).is_err() {
                            break;
                        }
                    }
                });
            }

            let settle_shared = &shared;
            let settler = s.spawn(move || {
                let staged: Vec<TxnIndex> = settle_rx.iter().collect();
                if settle_shared.is_halted() {
                    debug!(staged = staged.len(), "dropping staged settles of a halted block");
                    return Ok(());
                }
                staged
                    .into_iter()
                    .try_for_each(|tx| settle_task(&mut **settle_shared.tasks[tx].lock(), tx))
            });

            drop((priority_rx, speculative_rx, results_tx));

            let dispatcher = Dispatcher {
                priority: priority_tx,
                speculative: speculative_tx,
                settle: settle_tx,
            };
            let outcome = control_loop(
                &shared,
                &mut scheduler,
                &dispatcher,
                results_rx,
                &mut stats,
                &mut check,
            );
            if let Err(err) = &outcome {
                warn!(%err, "parallel execution halted");
                shared.halted.store(true, Ordering::Release);
            }
            // Closing the lanes ends the workers and releases the staged settles.
            drop(dispatcher);

            let settled = settler.join().unwrap_or_else(|payload| panic::resume_unwind(payload));
            outcome.and(settled)
        });
        outcome?;

        debug_assert_eq!(shared.store.estimate_count(), 0);

        let FinalSchedule {
            txio,
            incarnations,
            counters,
            summary,
        } = scheduler.finish();
        let mut deps = BTreeMap::new();
        if self.config.profile {
            deps = get_dep(&txio);

            let mut last_stat = HashMap::with_capacity(num_txns);
            for stat in &stats {
                last_stat.insert(stat.txn_idx, *stat);
            }
            Dag::build(&txio).report(&last_stat, |line| info!("{line}"));
        }

        Ok(ParallelExecutionResult {
            txio,
            incarnations,
            txn_counters: counters,
            stats,
            deps,
            summary,
        })
    }
}

/// Feeds worker results to the scheduler in index order until the block is
/// done or fails.
fn control_loop<T: ExecTask>(
    shared: &Shared<'_, T>,
    scheduler: &mut Scheduler<T::Value>,
    dispatcher: &Dispatcher,
    results: Receiver<WorkerOutput<T::Value>>,
    stats: &mut Vec<ExecutionStat>,
    check: &mut impl FnMut(&Scheduler<T::Value>),
) -> Result<(), BlockStmError> {
    let mut ready = BinaryHeap::with_capacity(shared.tasks.len());

    if !dispatcher.send(shared, scheduler.bootstrap()) {
        return Err(scheduler.stalled_error());
    }

    loop {
        if ready.is_empty() {
            match results.recv() {
                Ok(output) => ready.push(Reverse(output)),
                Err(_) => return Err(scheduler.stalled_error()),
            }
        }
        ready.extend(results.try_iter().map(Reverse));

        let Some(Reverse(output)) = ready.pop() else {
            continue;
        };
        stats.extend(output.stat);

        let dispatch = scheduler.step(output.result, &shared.store)?;
        check(&*scheduler);
        let done = dispatch.done;
        if !dispatcher.send(shared, dispatch) {
            return Err(scheduler.stalled_error());
        }
        if done {
            return Ok(());
        }
        if scheduler.in_flight() == 0 {
            return Err(scheduler.stalled_error());
        }
    }
}

/// Dependencies to block on before anything runs, as `(blocker, blocked)`.
fn initial_dependencies<T: ExecTask>(
    tasks: &[T],
    use_hints: bool,
) -> Vec<(TxnIndex, TxnIndex)> {
    let mut deps = Vec::new();

    if use_hints {
        for (tx, task) in tasks.iter().enumerate() {
            let hints = task.dependencies().into_iter().filter(|&dep| dep < tx);
            deps.extend(hints.map(|dep| (dep, tx)));
        }
        return deps;
    }

    let mut prev_sender_tx: HashMap<Address, TxnIndex> = HashMap::new();
    for (tx, task) in tasks.iter().enumerate() {
        if let Some(prev) = prev_sender_tx.insert(task.sender(), tx) {
            deps.push((prev, tx));
        }
    }
    deps
}

/// Runs one incarnation and, on success, publishes its writes to the store.
pub(crate) fn run_version<T: ExecTask + ?Sized>(
    task: &mut T,
    store: &MVHashMap<T::Value>,
    version: Version,
) -> ExecResult<T::Value> {
    let executed =
        panic::catch_unwind(AssertUnwindSafe(|| task.execute(store, version.incarnation)));

    let outcome = match executed {
        Ok(Ok(())) => {
            let all_output = task.full_write_list();
            store.flush_write_set(&all_output);
            ExecOutcome::Success(TaskSets {
                input: task.read_list(),
                output: task.write_list(),
                all_output,
            })
        }
        Ok(Err(ExecError::Abort(abort))) => ExecOutcome::Abort(abort),
        Ok(Err(ExecError::Fatal(source))) => ExecOutcome::Fatal(source),
        Err(_) => ExecOutcome::Panicked,
    };

    ExecResult { version, outcome }
}

/// Applies the finalized effects of one task.
fn settle_task<T: ExecTask + ?Sized>(task: &mut T, tx: TxnIndex) -> Result<(), BlockStmError> {
    panic::catch_unwind(AssertUnwindSafe(|| task.settle()))
        .map_err(|_| BlockStmError::TaskPanicked { txn_idx: tx })
}

/// Executes a block of tasks with the default lane sizes.
pub fn execute_parallel<T: ExecTask>(
    tasks: &mut [T],
    profile: bool,
    use_dependency_hints: bool,
) -> Result<ParallelExecutionResult<T::Value>, BlockStmError> {
    ParallelExecutor::new(ExecutorConfig {
        profile,
        use_dependency_hints,
        ..Default::default()
    })
    .execute(tasks)
}

/// Executes tasks one at a time, in index order, then settles all of them.
///
/// Produces the reference results a parallel run must match. As with the
/// parallel executor, a failing block settles nothing.
pub fn execute_sequential<T: ExecTask>(
    tasks: &mut [T],
) -> Result<ParallelExecutionResult<T::Value>, BlockStmError> {
    let store = MVHashMap::new();
    let mut txio = TxnInputOutput::new(tasks.len());
    let mut summary = ExecutionSummary::default();

    for (tx, task) in tasks.iter_mut().enumerate() {
        summary.executions += 1;
        match run_version(task, &store, Version::new(tx, 0)).outcome {
            ExecOutcome::Success(sets) => {
                txio.record_read(tx, sets.input);
                txio.record_write(tx, sets.output);
                txio.record_all_write(tx, sets.all_output);
                summary.successes += 1;
            }
            ExecOutcome::Abort(_) => {
                return Err(BlockStmError::UnexpectedAbort { txn_idx: tx });
            }
            ExecOutcome::Fatal(source) => {
                return Err(BlockStmError::Execution { txn_idx: tx, source });
            }
            ExecOutcome::Panicked => return Err(BlockStmError::TaskPanicked { txn_idx: tx }),
        }
    }

    for (tx, task) in tasks.iter_mut().enumerate() {
        settle_task(task, tx)?;
    }

    Ok(ParallelExecutionResult {
        incarnations: vec![0; tasks.len()],
        txn_counters: vec![TxnCounters { successes: 1, aborts: 0 }; tasks.len()],
        txio,
        stats: Vec::new(),
        deps: BTreeMap::new(),
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{key, ScriptedTask, TestEnv};

    #[test]
    fn test_empty_block() {
        let mut tasks: Vec<ScriptedTask> = Vec::new();
        let result = execute_parallel(&mut tasks, true, false).unwrap();

        assert!(result.txio.is_empty());
        assert_eq!(result.summary, ExecutionSummary::default());
    }

    #[test]
    fn test_default_lanes() {
        let config = ExecutorConfig::default();
        assert_eq!(config.num_priority_workers, 2);
        assert_eq!(config.num_speculative_workers, 8);
    }

    #[test]
    fn test_sender_chain_dependencies() {
        let env = TestEnv::new();
        let a = Address::repeat_byte(0xa);
        let b = Address::repeat_byte(0xb);
        let tasks = vec![
            ScriptedTask::new(0, &env).sender(a),
            ScriptedTask::new(1, &env).sender(b),
            ScriptedTask::new(2, &env).sender(a),
            ScriptedTask::new(3, &env).sender(a).hints([1, 3, 7]),
        ];

        assert_eq!(initial_dependencies(&tasks, false), vec![(0, 2), (2, 3)]);
        assert_eq!(initial_dependencies(&tasks, true), vec![(1, 3)]);
    }

    #[test]
    fn test_sequential_settles_in_order() {
        let env = TestEnv::new();
        let mut tasks = vec![
            ScriptedTask::new(0, &env).writes([key(1)]),
            ScriptedTask::new(1, &env).reads([key(1)]).writes([key(2)]),
        ];

        let result = execute_sequential(&mut tasks).unwrap();

        assert_eq!(env.settled_indices(), vec![0, 1]);
        assert_eq!(result.summary.executions, 2);
        assert_eq!(
            result.txio.read_set(1)[0].kind,
            crate::types::ReadKind::Map(Version::new(0, 0))
        );
    }

    #[test]
    fn test_sequential_stops_at_failure() {
        let env = TestEnv::new();
        let mut tasks = vec![
            ScriptedTask::new(0, &env).writes([key(1)]),
            ScriptedTask::new(1, &env).fatal(),
            ScriptedTask::new(2, &env),
        ];

        let err = execute_sequential(&mut tasks).unwrap_err();

        assert!(matches!(err, BlockStmError::Execution { txn_idx: 1, .. }));
        assert!(env.settled().is_empty());
    }

    #[test]
    fn test_settle_task_catches_panic() {
        let env = TestEnv::new();
        let mut task = ScriptedTask::new(3, &env).panics_on_settle();

        let err = settle_task(&mut task, 3).unwrap_err();
        assert!(matches!(err, BlockStmError::TaskPanicked { txn_idx: 3 }));
    }

    #[test]
    fn test_run_version_catches_panic() {
        let env = TestEnv::new();
        let store = MVHashMap::new();
        let mut task = ScriptedTask::new(0, &env).panics();

        let result = run_version(&mut task, &store, Version::new(0, 0));
        assert!(matches!(result.outcome, ExecOutcome::Panicked));
    }
}
