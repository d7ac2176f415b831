//! CLI comparing sequential and Block-STM execution of transfer workloads.

use block_stm_executor::ExecutorConfig;
use blockstm_bench::{BlockStmExecutor, Executor, SequentialExecutor, Workload, WorkloadConfig};
use clap::Parser;
use std::error::Error;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Run ETH transfer workloads through sequential and Block-STM executors")]
struct Args {
    /// Number of funded accounts
    #[arg(long, default_value_t = 1000)]
    accounts: usize,

    /// Transactions per run
    #[arg(long, default_value_t = 1000)]
    transactions: usize,

    /// Conflict factors to run, between 0.0 and 1.0
    #[arg(long, value_delimiter = ',', default_values_t = [0.0, 0.25, 0.5, 0.75, 1.0])]
    conflicts: Vec<f64>,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Workers serving the priority lane
    #[arg(long, default_value_t = 2)]
    priority_workers: usize,

    /// Workers serving the speculative lane
    #[arg(long, default_value_t = 8)]
    speculative_workers: usize,

    /// Seed the scheduler with per-account dependency hints
    #[arg(long)]
    hints: bool,

    /// Log execution stats and the critical path of each block
    #[arg(long)]
    profile: bool,

    /// Skip signature recovery
    #[arg(long)]
    no_verify: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let verify = !args.no_verify;

    let sequential = SequentialExecutor::new(verify);
    let parallel = BlockStmExecutor::new(
        ExecutorConfig {
            num_priority_workers: args.priority_workers,
            num_speculative_workers: args.speculative_workers,
            profile: args.profile,
            use_dependency_hints: args.hints,
        },
        verify,
    );

    info!(
        accounts = args.accounts,
        transactions = args.transactions,
        verify,
        "starting benchmark"
    );

    for &conflict_factor in &args.conflicts {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: args.accounts,
            num_transactions: args.transactions,
            conflict_factor,
            seed: args.seed,
            chain_id: 1,
        });

        let executors: [&dyn Executor; 2] = [&sequential, &parallel];
        let mut states = Vec::with_capacity(2);
        for executor in executors {
            let start = Instant::now();
            let (state, result) = executor.execute(&workload)?;
            let elapsed = start.elapsed();

            println!(
                "{:>5.0}% conflicts | {:18} | {:5} successful | {:8.2} ms | {:8.0} tx/s | {}",
                conflict_factor * 100.0,
                executor.name(),
                result.successful,
                elapsed.as_secs_f64() * 1000.0,
                args.transactions as f64 / elapsed.as_secs_f64(),
                result.summary,
            );
            states.push(state);
        }

        if states[0] != states[1] {
            warn!(conflict_factor, "parallel state differs from sequential state");
            return Err(format!("state mismatch at conflict factor {conflict_factor}").into());
        }
    }

    Ok(())
}
