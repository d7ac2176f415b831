//! Scheduler state for coordinating parallel execution.
//!
//! The [`Scheduler`] is owned by a single control loop. Workers never touch it;
//! they hand back an [`ExecResult`] per execution and the loop feeds results
//! to [`Scheduler::step`] one at a time, in ascending index order of what is
//! available. Each step returns the work to hand out next.

use crate::error::{AbortError, BlockStmError, BoxError};
use crate::mvhashmap::{validate_version, MVHashMap};
use crate::status::TaskStatusManager;
use crate::txio::{TxnInput, TxnInputOutput, TxnOutput};
use crate::types::{ExecutionSummary, Incarnation, TxnCounters, TxnIndex, Version};
use std::collections::HashSet;
use tracing::{debug, info};

/// Read and write sets reported by a successful execution.
#[derive(Debug, Clone)]
pub struct TaskSets<V> {
    pub input: TxnInput,
    pub output: TxnOutput<V>,
    pub all_output: TxnOutput<V>,
}

/// How an execution attempt ended.
#[derive(Debug)]
pub enum ExecOutcome<V> {
    Success(TaskSets<V>),
    Abort(AbortError),
    Fatal(BoxError),
    Panicked,
}

/// Result of executing one version of a transaction.
#[derive(Debug)]
pub struct ExecResult<V> {
    pub version: Version,
    pub outcome: ExecOutcome<V>,
}

/// Work produced by one scheduler step.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Transactions to settle, in order.
    pub settle: Vec<TxnIndex>,
    /// Lowest runnable transaction, right after the validated prefix.
    pub priority: Option<Version>,
    /// Everything else that became runnable, in index order.
    pub speculative: Vec<Version>,
    /// Every transaction has executed and validated.
    pub done: bool,
}

/// Next abort target for a transaction that aborted without naming one.
///
/// Always strictly below `tx`, and moves towards `tx` on repeated aborts.
pub fn next_estimate(estimate: TxnIndex, tx: TxnIndex) -> TxnIndex {
    let next = estimate + (estimate + tx) / 2;
    if next >= tx {
        tx.saturating_sub(1)
    } else {
        next
    }
}

/// Everything a scheduler hands back once its block is done.
#[derive(Debug)]
pub struct FinalSchedule<V> {
    /// Inputs and outputs of the final incarnation of every transaction.
    pub txio: TxnInputOutput<V>,
    pub incarnations: Vec<Incarnation>,
    pub counters: Vec<TxnCounters>,
    pub summary: ExecutionSummary,
}

pub struct Scheduler<V> {
    /// Number of transactions in the block.
    num_txns: usize,
    exec_tasks: TaskStatusManager,
    validate_tasks: TaskStatusManager,
    /// Inputs and outputs of the last successful incarnation of each transaction.
    txio: TxnInputOutput<V>,
    /// Incarnation to use for the next execution of each transaction.
    incarnations: Vec<Incarnation>,
    /// Abort targets guessed for transactions that aborted without naming one.
    estimate_deps: Vec<Vec<TxnIndex>>,
    /// Executions started once every lower transaction had been validated.
    /// Their reads cannot change, so their validation is skipped.
    skip_check: Vec<bool>,
    /// Next transaction to settle.
    next_settle: TxnIndex,
    counters: Vec<TxnCounters>,
    summary: ExecutionSummary,
}

impl<V: Clone> Scheduler<V> {
    /// Creates a scheduler for a block of transactions, all pending.
    pub fn new(num_txns: usize) -> Self {
        Self {
            num_txns,
            exec_tasks: TaskStatusManager::new(num_txns),
            validate_tasks: TaskStatusManager::empty(),
            txio: TxnInputOutput::new(num_txns),
            incarnations: vec![0; num_txns],
            estimate_deps: vec![Vec::new(); num_txns],
            skip_check: vec![false; num_txns],
            next_settle: 0,
            counters: vec![TxnCounters::default(); num_txns],
            summary: ExecutionSummary::default(),
        }
    }

    /// Blocks transactions on dependencies known before execution starts.
    ///
    /// Pairs are `(blocker, blocked)`; pairs whose blocker does not precede
    /// the blocked transaction are ignored.
    pub fn seed_dependencies(&mut self, deps: impl IntoIterator<Item = (TxnIndex, TxnIndex)>) {
        for (blocker, blocked) in deps {
            self.exec_tasks.add_dependency(blocker, blocked);
        }
    }

    /// Hands out the initial work.
    pub fn bootstrap(&mut self) -> Dispatch {
        let mut out = Dispatch::default();
        self.dispatch(&mut out);
        out
    }

    /// Consumes one execution result.
    ///
    /// Any outcome other than success or a dependency conflict ends the run.
    pub fn step(
        &mut self,
        result: ExecResult<V>,
        store: &MVHashMap<V>,
    ) -> Result<Dispatch, BlockStmError> {
        let Version {
            txn_idx: tx,
            incarnation,
        } = result.version;

        match result.outcome {
            ExecOutcome::Success(sets) => self.handle_success(tx, sets, store),
            ExecOutcome::Abort(abort) => self.handle_abort(tx, incarnation, abort),
            ExecOutcome::Fatal(source) => {
                return Err(BlockStmError::Execution { txn_idx: tx, source })
            }
            ExecOutcome::Panicked => return Err(BlockStmError::TaskPanicked { txn_idx: tx }),
        }

        self.validate(store);

        let mut out = Dispatch::default();
        self.settle(&mut out);

        if self.is_done() {
            info!(num_txns = self.num_txns, summary = %self.summary, "block-stm exec summary");
            out.done = true;
            return Ok(out);
        }

        self.dispatch(&mut out);
        Ok(out)
    }

    fn handle_abort(&mut self, tx: TxnIndex, incarnation: Incarnation, abort: AbortError) {
        let estimates = &mut self.estimate_deps[tx];

        let blocked = match abort.dependency {
            Some(dep) => {
                while estimates.last().is_some_and(|&estimate| estimate > dep) {
                    estimates.pop();
                }
                self.exec_tasks.add_dependency(dep, tx)
            }
            None => {
                let estimate = estimates.last().copied().unwrap_or(0);
                if estimate < tx {
                    estimates.push(next_estimate(estimate, tx));
                }
                self.exec_tasks.add_dependency(estimate, tx)
            }
        };

        debug!(tx, incarnation, dependency = ?abort.dependency, blocked, "execution aborted");

        self.exec_tasks.clear_in_progress(tx);
        self.exec_tasks.push_pending(tx);
        self.incarnations[tx] += 1;
        self.counters[tx].aborts += 1;
        self.summary.aborts += 1;
    }

    fn handle_success(&mut self, tx: TxnIndex, sets: TaskSets<V>, store: &MVHashMap<V>) {
        let TaskSets {
            input,
            output,
            all_output,
        } = sets;

        self.txio.record_read(tx, input);

        let previous = self.txio.all_write_set(tx);
        if all_output.has_new_write(previous) {
            self.validate_tasks
                .push_pending_set(self.exec_tasks.revalidation_range(tx + 1));
        }

        // Locations the previous incarnation wrote but this one did not.
        let written: HashSet<_> = all_output.keys().collect();
        for key in previous.keys().filter(|key| !written.contains(key)) {
            store.delete(key, tx);
        }

        self.txio.record_write(tx, output);
        self.txio.record_all_write(tx, all_output);

        self.validate_tasks.push_pending(tx);
        self.exec_tasks.mark_complete(tx);
        self.exec_tasks.remove_dependency(tx);
        self.counters[tx].successes += 1;
        self.summary.successes += 1;
    }

    /// Validates every pending transaction below the execution frontier.
    fn validate(&mut self, store: &MVHashMap<V>) {
        let Some(max_complete) = self.exec_tasks.max_all_complete() else {
            return;
        };

        let mut to_validate = Vec::new();
        while let Some(tx) = self.validate_tasks.min_pending() {
            if tx > max_complete {
                break;
            }
            self.validate_tasks.take_next_pending();
            to_validate.push(tx);
        }

        for tx in to_validate {
            self.summary.validations += 1;

            if self.skip_check[tx] || validate_version(tx, &self.txio, store) {
                self.validate_tasks.mark_complete(tx);
                continue;
            }

            self.summary.validation_failures += 1;
            debug!(tx, incarnation = self.incarnations[tx], "validation failed");

            for w in self.txio.all_write_set(tx) {
                store.mark_estimate(&w.key, tx);
            }

            // Everything above tx, including the rest of this pass, is
            // validated again once tx has re-executed.
            self.validate_tasks
                .push_pending_set(self.exec_tasks.revalidation_range(tx + 1));
            self.validate_tasks.clear_in_progress(tx);

            self.exec_tasks.clear_complete(tx);
            self.exec_tasks.push_pending(tx);
            self.incarnations[tx] += 1;
            break;
        }
    }

    /// Settles validated transactions that will not run again.
    fn settle(&mut self, out: &mut Dispatch) {
        let Some(max_validated) = self.validate_tasks.max_all_complete() else {
            return;
        };

        while self.next_settle <= max_validated {
            let tx = self.next_settle;
            if self.exec_tasks.check_in_progress(tx)
                || self.exec_tasks.check_pending(tx)
                || self.exec_tasks.is_blocked(tx)
            {
                break;
            }
            out.settle.push(tx);
            self.next_settle += 1;
        }
    }

    fn dispatch(&mut self, out: &mut Dispatch) {
        let frontier = self.validated_frontier();

        if self.exec_tasks.min_pending() == Some(frontier) {
            if let Some(tx) = self.exec_tasks.take_next_pending() {
                self.skip_check[tx] = true;
                out.priority = Some(self.next_version(tx));
            }
        }

        while let Some(tx) = self.exec_tasks.take_next_pending() {
            let version = self.next_version(tx);
            out.speculative.push(version);
        }
    }

    fn next_version(&mut self, tx: TxnIndex) -> Version {
        self.summary.executions += 1;
        Version::new(tx, self.incarnations[tx])
    }

    pub fn is_done(&self) -> bool {
        self.exec_tasks.count_complete() == self.num_txns
            && self.validate_tasks.count_complete() == self.num_txns
    }

    /// Number of executions handed out and not yet reported back.
    pub fn in_flight(&self) -> usize {
        self.exec_tasks.count_in_progress()
    }

    pub fn stalled_error(&self) -> BlockStmError {
        BlockStmError::Stalled {
            pending: self.exec_tasks.count_pending(),
            complete: self.exec_tasks.count_complete(),
        }
    }

    pub fn summary(&self) -> ExecutionSummary {
        self.summary
    }

    pub fn incarnation(&self, tx: TxnIndex) -> Incarnation {
        self.incarnations[tx]
    }

    pub fn counters(&self, tx: TxnIndex) -> TxnCounters {
        self.counters[tx]
    }

    /// Number of transactions handed out for settlement so far.
    pub fn settled(&self) -> usize {
        self.next_settle
    }

    /// One past the highest index below which every transaction is validated.
    pub fn validated_frontier(&self) -> TxnIndex {
        self.validate_tasks
            .max_all_complete()
            .map_or(0, |max_validated| max_validated + 1)
    }

    pub fn num_txns(&self) -> usize {
        self.num_txns
    }

    /// Abort targets guessed so far for `tx`.
    pub fn estimates(&self, tx: TxnIndex) -> &[TxnIndex] {
        &self.estimate_deps[tx]
    }

    pub fn txio(&self) -> &TxnInputOutput<V> {
        &self.txio
    }

    pub fn finish(self) -> FinalSchedule<V> {
        FinalSchedule {
            txio: self.txio,
            incarnations: self.incarnations,
            counters: self.counters,
            summary: self.summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::run_version;
    use crate::mvhashmap::CellFlag;
    use crate::test_utils::{key, ScriptedTask, TestEnv};
    use crate::types::{Key, ReadKind};
    use std::collections::VecDeque;

    fn expect_success(result: &ExecResult<u64>) {
        assert!(matches!(result.outcome, ExecOutcome::Success(_)), "{result:?}");
    }

    #[test]
    fn test_next_estimate_stays_below_tx() {
        for tx in 1..200 {
            let mut estimate = 0;
            for _ in 0..16 {
                let next = next_estimate(estimate, tx);
                assert!(next < tx);
                assert!(next >= estimate);
                estimate = next;
            }
            assert_eq!(estimate, tx - 1);
        }
    }

    #[test]
    fn test_bootstrap_hands_out_everything() {
        let mut scheduler = Scheduler::<u64>::new(3);
        let dispatch = scheduler.bootstrap();

        assert_eq!(dispatch.priority, Some(Version::new(0, 0)));
        assert_eq!(dispatch.speculative, vec![Version::new(1, 0), Version::new(2, 0)]);
        assert_eq!(scheduler.in_flight(), 3);
    }

    #[test]
    fn test_seeded_dependency_holds_back_transaction() {
        let mut scheduler = Scheduler::<u64>::new(3);
        scheduler.seed_dependencies([(0, 2), (2, 1)]);
        let dispatch = scheduler.bootstrap();

        assert_eq!(dispatch.priority, Some(Version::new(0, 0)));
        assert_eq!(dispatch.speculative, vec![Version::new(1, 0)]);
    }

    #[test]
    fn test_abort_with_dependency_waits_for_dependency() {
        let env = TestEnv::new();
        let store = MVHashMap::new();
        let mut tx0 = ScriptedTask::new(0, &env).writes([key(1)]);
        let mut tx1 = ScriptedTask::new(1, &env).reads([key(1)]).abort_once_on(0);

        let mut scheduler = Scheduler::new(2);
        scheduler.bootstrap();

        // tx1 runs ahead of tx0 and reports it as the missing writer
        let result = run_version(&mut tx1, &store, Version::new(1, 0));
        let dispatch = scheduler.step(result, &store).unwrap();
        assert_eq!(dispatch, Dispatch::default());
        assert_eq!(scheduler.incarnation(1), 1);

        let result = run_version(&mut tx0, &store, Version::new(0, 0));
        expect_success(&result);
        let dispatch = scheduler.step(result, &store).unwrap();
        assert_eq!(dispatch.settle, vec![0]);
        assert_eq!(dispatch.priority, Some(Version::new(1, 1)));

        let result = run_version(&mut tx1, &store, Version::new(1, 1));
        let dispatch = scheduler.step(result, &store).unwrap();
        assert_eq!(dispatch.settle, vec![1]);
        assert!(dispatch.done);

        let schedule = scheduler.finish();
        assert_eq!(
            schedule.txio.read_set(1)[0].kind,
            ReadKind::Map(Version::new(0, 0))
        );
        assert_eq!(schedule.incarnations, vec![0, 1]);
        assert_eq!(schedule.summary.aborts, 1);
        assert_eq!(schedule.counters[0], TxnCounters { successes: 1, aborts: 0 });
        assert_eq!(schedule.counters[1], TxnCounters { successes: 1, aborts: 1 });
    }

    #[test]
    fn test_validation_failure_and_dropped_write() {
        let env = TestEnv::new();
        let store = MVHashMap::new();
        let guard = key(1);
        let dropped = key(2);
        let kept = key(3);

        let mut tx0 = ScriptedTask::new(0, &env).writes([guard]);
        let mut tx1 = ScriptedTask::new(1, &env)
            .writes([kept])
            .writes_when_absent(guard, dropped);

        let mut scheduler = Scheduler::new(2);
        scheduler.bootstrap();

        // tx1 runs first, sees no guard and writes the extra location
        let result = run_version(&mut tx1, &store, Version::new(1, 0));
        expect_success(&result);
        assert_eq!(scheduler.step(result, &store).unwrap(), Dispatch::default());
        assert!(store.entry(&dropped, 1).is_some());

        let result = run_version(&mut tx0, &store, Version::new(0, 0));
        let dispatch = scheduler.step(result, &store).unwrap();
        assert_eq!(dispatch.settle, vec![0]);
        assert_eq!(dispatch.priority, Some(Version::new(1, 1)));
        assert_eq!(store.entry(&dropped, 1).map(|cell| cell.flag), Some(CellFlag::Estimate));
        assert_eq!(store.entry(&kept, 1).map(|cell| cell.flag), Some(CellFlag::Estimate));

        let result = run_version(&mut tx1, &store, Version::new(1, 1));
        let dispatch = scheduler.step(result, &store).unwrap();
        assert_eq!(dispatch.settle, vec![1]);
        assert!(dispatch.done);

        assert!(store.entry(&dropped, 1).is_none());
        assert_eq!(store.entry(&kept, 1).map(|cell| cell.incarnation), Some(1));
        assert_eq!(store.estimate_count(), 0);
        assert_eq!(scheduler.summary().validation_failures, 1);
    }

    #[test]
    fn test_new_write_revalidates_completed_successors() {
        let env = TestEnv::new();
        let store = MVHashMap::new();
        let a = key(1);
        let b = key(2);

        let mut tx0 = ScriptedTask::new(0, &env).writes([a]);
        let mut tx1 = ScriptedTask::new(1, &env).reads([a]).writes_when_present(a, b);
        let mut tx2 = ScriptedTask::new(2, &env).reads([b]).writes([key(3)]);

        let mut scheduler = Scheduler::new(3);
        scheduler.bootstrap();

        for (task, version) in [
            (&mut tx2, Version::new(2, 0)),
            (&mut tx1, Version::new(1, 0)),
        ] {
            let result = run_version(task, &store, version);
            scheduler.step(result, &store).unwrap();
        }

        let result = run_version(&mut tx0, &store, Version::new(0, 0));
        let dispatch = scheduler.step(result, &store).unwrap();
        assert_eq!(dispatch.settle, vec![0]);
        assert_eq!(dispatch.priority, Some(Version::new(1, 1)));

        // tx1 now writes b, which tx2 read from base state
        let result = run_version(&mut tx1, &store, Version::new(1, 1));
        let dispatch = scheduler.step(result, &store).unwrap();
        assert_eq!(dispatch.settle, vec![1]);
        assert_eq!(dispatch.priority, Some(Version::new(2, 1)));

        let result = run_version(&mut tx2, &store, Version::new(2, 1));
        let dispatch = scheduler.step(result, &store).unwrap();
        assert_eq!(dispatch.settle, vec![2]);
        assert!(dispatch.done);
        assert_eq!(
            scheduler.txio().read_set(2)[0].kind,
            ReadKind::Map(Version::new(1, 1))
        );
    }

    #[test]
    fn test_unknown_dependency_narrows_estimate() {
        let env = TestEnv::new();
        let store = MVHashMap::new();
        let mut tasks: Vec<ScriptedTask> = (0..6)
            .map(|i| ScriptedTask::new(i, &env).writes([key(i as u8)]))
            .collect();
        tasks[5] = ScriptedTask::new(5, &env).unknown_aborts(3);

        let mut scheduler = Scheduler::new(6);
        let dispatch = scheduler.bootstrap();
        let mut outstanding: VecDeque<Version> = dispatch.priority.into_iter().collect();
        outstanding.extend(dispatch.speculative);

        let mut done = false;
        while let Some(version) = outstanding.pop_front() {
            let result = run_version(&mut tasks[version.txn_idx], &store, version);
            let dispatch = scheduler.step(result, &store).unwrap();
            outstanding.extend(dispatch.priority);
            outstanding.extend(dispatch.speculative);
            done = dispatch.done;
        }

        assert!(done);
        assert_eq!(scheduler.incarnation(5), 3);
        assert!(!scheduler.estimates(5).is_empty());
        assert!(scheduler.estimates(5).iter().all(|&estimate| estimate < 5));
    }

    #[test]
    fn test_fatal_error_ends_run() {
        let env = TestEnv::new();
        let store = MVHashMap::new();
        let mut tx0 = ScriptedTask::new(0, &env).fatal();

        let mut scheduler = Scheduler::new(1);
        scheduler.bootstrap();

        let result = run_version(&mut tx0, &store, Version::new(0, 0));
        match scheduler.step(result, &store) {
            Err(BlockStmError::Execution { txn_idx, .. }) => assert_eq!(txn_idx, 0),
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[test]
    fn test_key_helper_is_distinct() {
        let keys: HashSet<Key> = (0..10).map(key).collect();
        assert_eq!(keys.len(), 10);
    }
}
