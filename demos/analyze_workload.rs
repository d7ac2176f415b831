use blockstm_bench::{Workload, WorkloadConfig};
use std::collections::HashMap;

fn main() {
    let config = WorkloadConfig {
        num_accounts: 50_000,
        num_transactions: 10_000,
        conflict_factor: 0.0,
        seed: 42,
        chain_id: 1,
    };

    let workload = Workload::generate(config);

    let mut sender_counts: HashMap<_, usize> = HashMap::new();
    for tx in &workload.transactions {
        *sender_counts.entry(tx.from).or_insert(0) += 1;
    }

    let multi_tx_accounts = sender_counts.values().filter(|&&count| count > 1).count();

    println!("Total accounts that sent txs: {}", sender_counts.len());
    println!("Accounts that sent >1 tx: {}", multi_tx_accounts);
    println!(
        "Max txs from one account: {}",
        sender_counts.values().max().copied().unwrap_or(0)
    );

    let mut hist = HashMap::new();
    for count in sender_counts.values() {
        *hist.entry(*count).or_insert(0) += 1;
    }

    println!("\nTransaction count distribution:");
    let mut hist_vec: Vec<_> = hist.iter().collect();
    hist_vec.sort_by_key(|(k, _)| *k);
    for (count, num_accounts) in hist_vec {
        println!("  {} tx: {} accounts", count, num_accounts);
    }

    // Read-after-write chains the scheduler will see
    let hints = workload.dependency_hints();
    let dependent = hints.iter().filter(|deps| !deps.is_empty()).count();
    let mut depth = vec![0usize; hints.len()];
    for (index, deps) in hints.iter().enumerate() {
        let below = deps.iter().map(|&dep| depth[dep] + 1).max().unwrap_or(0);
        depth[index] = below;
    }

    println!("\nTransactions with a lower dependency: {}", dependent);
    println!("Longest dependency chain: {}", depth.iter().max().copied().unwrap_or(0) + 1);
}
