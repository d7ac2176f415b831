//! Read-after-write dependency graph of an executed block, used for profiling.

use crate::txio::{TxnInput, TxnInputOutput, TxnOutput};
use crate::types::{ExecutionStat, Key, TxnIndex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// Returns true if `to` read any location that `from` wrote.
pub fn has_read_dep<V>(from: &TxnOutput<V>, to: &TxnInput) -> bool {
    let reads: HashSet<&Key> = to.iter().map(|rd| &rd.key).collect();
    from.keys().any(|key| reads.contains(key))
}

/// Maps each transaction to the lower transactions whose writes it read,
/// highest first. Transactions without dependencies are left out.
pub fn get_dep<V>(txio: &TxnInputOutput<V>) -> BTreeMap<TxnIndex, Vec<TxnIndex>> {
    let mut deps = BTreeMap::new();
    for to in 1..txio.len() {
        let parents: Vec<_> = (0..to)
            .rev()
            .filter(|&from| has_read_dep(txio.all_write_set(from), txio.read_set(to)))
            .collect();
        if !parents.is_empty() {
            deps.insert(to, parents);
        }
    }
    deps
}

/// Dependency graph with one vertex per transaction.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    parents: Vec<Vec<TxnIndex>>,
}

impl Dag {
    pub fn build<V>(txio: &TxnInputOutput<V>) -> Self {
        let mut parents = vec![Vec::new(); txio.len()];
        for (to, deps) in get_dep(txio) {
            parents[to] = deps;
        }
        Self { parents }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn parents(&self, tx: TxnIndex) -> &[TxnIndex] {
        &self.parents[tx]
    }

    /// Finds the chain of dependent transactions with the largest total
    /// execution time, in ascending index order, and that total.
    pub fn longest_path(
        &self,
        stats: &HashMap<TxnIndex, ExecutionStat>,
    ) -> (Vec<TxnIndex>, Duration) {
        if self.is_empty() {
            return (Vec::new(), Duration::ZERO);
        }

        let cost = |tx: TxnIndex| stats.get(&tx).map_or(Duration::ZERO, ExecutionStat::duration);
        let mut weights = vec![Duration::ZERO; self.len()];
        let mut prev: Vec<Option<TxnIndex>> = vec![None; self.len()];
        let mut max_tx = 0;

        for tx in 0..self.len() {
            weights[tx] = cost(tx);
            for &parent in &self.parents[tx] {
                let weight = weights[parent] + cost(tx);
                if weight > weights[tx] {
                    weights[tx] = weight;
                    prev[tx] = Some(parent);
                }
            }
            if weights[tx] > weights[max_tx] {
                max_tx = tx;
            }
        }

        let mut path = vec![max_tx];
        while let Some(parent) = prev[path[path.len() - 1]] {
            path.push(parent);
        }
        path.reverse();

        (path, weights[max_tx])
    }

    /// Writes a human-readable summary of the critical path to `out`.
    pub fn report(&self, stats: &HashMap<TxnIndex, ExecutionStat>, mut out: impl FnMut(String)) {
        let (path, weight) = self.longest_path(stats);
        let serial: Duration = (0..self.len())
            .filter_map(|tx| stats.get(&tx))
            .map(ExecutionStat::duration)
            .sum();

        let ratio = if serial.is_zero() {
            0.0
        } else {
            weight.as_secs_f64() * 100.0 / serial.as_secs_f64()
        };
        let chain: Vec<String> = path.iter().map(ToString::to_string).collect();

        out("Longest execution path:".to_string());
        out(format!("({}) {}", path.len(), chain.join("->")));
        out(format!(
            "Longest path ideal execution time: {weight:?} of {serial:?} (serial total), \
             {ratio:.1}%"
        ));
    }
}
