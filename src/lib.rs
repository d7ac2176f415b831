//! Workload harness for the Block-STM parallel executor.
//!
//! This crate generates deterministic blocks of signed ETH transfers and runs
//! them through the `block-stm-executor` engine, either sequentially or in
//! parallel, so the two can be compared for speed and for identical results.
//!
//! # Architecture
//!
//! The framework is organized around three main concepts:
//!
//! - **Workload**: A pre-generated set of signed transactions and accounts
//! - **TransferTask**: A transaction wired to the executor's task interface
//! - **Executor**: A strategy for executing a workload (sequential, Block-STM)
//!
//! # Quick Start
//!
//! ```
//! use blockstm_bench::{BlockStmExecutor, Executor, Workload, WorkloadConfig};
//!
//! // Configure the workload
//! let config = WorkloadConfig {
//!     num_accounts: 100,
//!     num_transactions: 50,
//!     conflict_factor: 0.0,
//!     seed: 42,
//!     chain_id: 1,
//! };
//!
//! // Generate workload (signs all transactions upfront)
//! let workload = Workload::generate(config);
//!
//! // Execute with signature verification
//! let executor = BlockStmExecutor::with_verification(true);
//! let (_state, result) = executor.execute(&workload).unwrap();
//!
//! println!("Successful: {}", result.successful);
//! ```

pub mod executor;
pub mod state;
pub mod transfer;

pub use executor::{BlockStmExecutor, ExecutionResult, Executor, SequentialExecutor};
pub use state::{AccountState, GenesisState, Receipt, SettledState, StateValue, TxStatus};
pub use transfer::{TransferError, TransferTask};

use alloy_primitives::{keccak256, uint, Address, Signature, B256, U256};
use block_stm_executor::TxnIndex;
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

/// Balance every workload account starts with (1000 ETH).
pub const INITIAL_BALANCE: U256 = uint!(1_000_000_000_000_000_000_000_U256);

// ============================================================================
// Account & Key Management
// ============================================================================

/// An account with its signing key for transaction signing.
#[derive(Clone)]
pub struct Account {
    /// The secp256k1 signing key.
    pub signing_key: SigningKey,
    /// The Ethereum address derived from the public key.
    pub address: Address,
}

impl Account {
    /// Creates a new account from a signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = public_key_to_address(&verifying_key);
        Self { signing_key, address }
    }

    /// Generates a deterministic account from a seed.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes);
        let signing_key = SigningKey::from_bytes(&key_bytes.into())
            .expect("valid key bytes");
        Self::from_signing_key(signing_key)
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish()
    }
}

/// Derives an Ethereum address from a secp256k1 public key.
fn public_key_to_address(verifying_key: &VerifyingKey) -> Address {
    let public_key_bytes = verifying_key.to_encoded_point(false);
    // Skip the 0x04 prefix byte, hash the rest.
    let hash = keccak256(&public_key_bytes.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

// ============================================================================
// Signed Transaction
// ============================================================================

/// A signed ETH transfer transaction ready for execution.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// The sender's address (derived from signature during verification).
    pub from: Address,
    /// The recipient's address.
    pub to: Address,
    /// The value to transfer in wei.
    pub value: U256,
    /// The transaction nonce.
    pub nonce: u64,
    /// The ECDSA signature.
    pub signature: Signature,
    /// The hash of the transaction data that was signed.
    pub tx_hash: B256,
}

impl SignedTransaction {
    /// Creates a new signed transaction.
    /// The signature is created over a simplified hash of (from, to, value, nonce, chain_id).
    pub fn new(
        account: &Account,
        to: Address,
        value: U256,
        nonce: u64,
        chain_id: u64,
    ) -> Self {
        let tx_hash = Self::compute_tx_hash(account.address, to, value, nonce, chain_id);
        let signature = Self::sign(&account.signing_key, tx_hash);
        
        Self {
            from: account.address,
            to,
            value,
            nonce,
            signature,
            tx_hash,
        }
    }

    /// Computes the transaction hash for signing.
    fn compute_tx_hash(from: Address, to: Address, value: U256, nonce: u64, chain_id: u64) -> B256 {
        let mut data = Vec::with_capacity(20 + 20 + 32 + 8 + 8);
        data.extend_from_slice(from.as_slice());
        data.extend_from_slice(to.as_slice());
        data.extend_from_slice(&value.to_be_bytes::<32>());
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&chain_id.to_be_bytes());
        keccak256(&data)
    }

    /// Signs a transaction hash with the given signing key.
    fn sign(signing_key: &SigningKey, tx_hash: B256) -> Signature {
        let (sig, recovery_id) = signing_key
            .sign_prehash_recoverable(tx_hash.as_slice())
            .expect("signing should succeed");
        
        Signature::from_signature_and_parity(sig, recovery_id.is_y_odd())
    }

    /// Recovers the sender's address from the signature.
    /// Returns None if signature verification fails.
    pub fn recover_signer(&self) -> Option<Address> {
        self.signature
            .recover_address_from_prehash(&self.tx_hash)
            .ok()
    }

    /// Verifies the signature and returns true if valid.
    pub fn verify(&self) -> bool {
        self.recover_signer()
            .map(|addr| addr == self.from)
            .unwrap_or(false)
    }
}

// ============================================================================
// Workload Configuration & Generation
// ============================================================================

/// Configuration for workload generation.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Total number of accounts in the system.
    pub num_accounts: usize,
    /// Number of transactions to generate.
    pub num_transactions: usize,
    /// Conflict factor: 0.0 = no conflicts, 1.0 = all transactions touch same accounts.
    pub conflict_factor: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Chain ID for transaction signing.
    pub chain_id: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_accounts: 1000,
            num_transactions: 100,
            conflict_factor: 0.0,
            seed: 42,
            chain_id: 1,
        }
    }
}

/// A complete benchmark workload with pre-generated accounts and signed transactions.
#[derive(Debug, Clone)]
pub struct Workload {
    /// The accounts (with signing keys) participating in this workload.
    pub accounts: Vec<Account>,
    /// The pre-signed transactions to execute.
    pub transactions: Vec<SignedTransaction>,
    /// The configuration used to generate this workload.
    pub config: WorkloadConfig,
}

impl Workload {
    /// Generates a new workload from the given configuration.
    /// All transactions are pre-signed during generation.
    pub fn generate(config: WorkloadConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        
        // Generate accounts with deterministic keys.
        let accounts: Vec<Account> = (0..config.num_accounts)
            .map(|i| Account::from_seed(config.seed.wrapping_add(i as u64)))
            .collect();

        // Track nonces per account for proper transaction sequencing.
        let mut nonces: HashMap<usize, u64> = HashMap::new();

        // Calculate "hot" account range for conflict simulation.
        let hot_account_count = if config.conflict_factor > 0.0 {
            (2.0 + (1.0 - config.conflict_factor) * (config.num_accounts as f64 - 2.0))
                .max(2.0) as usize
        } else {
            config.num_accounts
        };

        // Generate and sign transactions.
        let transactions: Vec<SignedTransaction> = (0..config.num_transactions)
            .map(|_| {
                let use_hot = rng.gen::<f64>() < config.conflict_factor;

                let (from_idx, to_idx) = if use_hot {
                    let from = rng.gen_range(0..hot_account_count);
                    let mut to = rng.gen_range(0..hot_account_count);
                    while to == from {
                        to = rng.gen_range(0..hot_account_count);
                    }
                    (from, to)
                } else {
                    let from = rng.gen_range(0..config.num_accounts);
                    let mut to = rng.gen_range(0..config.num_accounts);
                    while to == from {
                        to = rng.gen_range(0..config.num_accounts);
                    }
                    (from, to)
                };

                let nonce = nonces.entry(from_idx).or_insert(0);
                let tx = SignedTransaction::new(
                    &accounts[from_idx],
                    accounts[to_idx].address,
                    U256::from(1_000_000_000_000_000u64), // 0.001 ETH
                    *nonce,
                    config.chain_id,
                );
                *nonce += 1;
                tx
            })
            .collect();

        Self {
            accounts,
            transactions,
            config,
        }
    }

    /// Pre-block state: every account funded with [`INITIAL_BALANCE`] at nonce 0.
    pub fn genesis(&self) -> GenesisState {
        GenesisState::new(
            self.accounts
                .iter()
                .map(|account| (account.address, AccountState::new(0, INITIAL_BALANCE)))
                .collect(),
        )
    }

    /// For each transaction, the previous transaction touching its sender or
    /// its recipient, if any.
    pub fn dependency_hints(&self) -> Vec<Vec<TxnIndex>> {
        let mut last_touch: HashMap<Address, TxnIndex> = HashMap::new();

        self.transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| {
                let mut deps: Vec<TxnIndex> = [tx.from, tx.to]
                    .iter()
                    .filter_map(|address| last_touch.get(address).copied())
                    .collect();
                deps.sort_unstable();
                deps.dedup();

                last_touch.insert(tx.from, index);
                last_touch.insert(tx.to, index);
                deps
            })
            .collect()
    }

    /// Wraps every transaction as an executor task settling into `settled`.
    pub fn tasks(
        &self,
        verify_signatures: bool,
        with_hints: bool,
        genesis: &Arc<GenesisState>,
        settled: &Arc<SettledState>,
    ) -> Vec<TransferTask> {
        let mut hints = if with_hints {
            self.dependency_hints()
        } else {
            Vec::new()
        };

        self.transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| {
                let task = TransferTask::new(
                    index,
                    tx.clone(),
                    verify_signatures,
                    Arc::clone(genesis),
                    Arc::clone(settled),
                );
                match hints.get_mut(index) {
                    Some(deps) => task.with_hints(std::mem::take(deps)),
                    None => task,
                }
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_generation() {
        let acc1 = Account::from_seed(1);
        let acc2 = Account::from_seed(2);
        
        // Different seeds produce different accounts.
        assert_ne!(acc1.address, acc2.address);
        
        // Same seed produces same account.
        let acc1_copy = Account::from_seed(1);
        assert_eq!(acc1.address, acc1_copy.address);
    }

    #[test]
    fn test_signature_verification() {
        let account = Account::from_seed(42);
        let tx = SignedTransaction::new(
            &account,
            Address::ZERO,
            U256::from(1000),
            0,
            1,
        );

        assert!(tx.verify());
        assert_eq!(tx.recover_signer(), Some(account.address));
    }

    #[test]
    fn test_workload_generation() {
        let config = WorkloadConfig {
            num_accounts: 10,
            num_transactions: 20,
            conflict_factor: 0.0,
            seed: 123,
            chain_id: 1,
        };

        let workload = Workload::generate(config);
        
        assert_eq!(workload.accounts.len(), 10);
        assert_eq!(workload.transactions.len(), 20);

        // All transactions should have valid signatures.
        for tx in &workload.transactions {
            assert!(tx.verify(), "Transaction signature should be valid");
        }
    }

    #[test]
    fn test_genesis_funds_every_account() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 5,
            num_transactions: 0,
            ..Default::default()
        });

        let genesis = workload.genesis();
        assert_eq!(genesis.accounts().len(), 5);
        for account in &workload.accounts {
            assert_eq!(
                genesis.account(&account.address),
                Some(AccountState::new(0, INITIAL_BALANCE))
            );
        }
    }

    #[test]
    fn test_dependency_hints_point_at_previous_touch() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 4,
            num_transactions: 30,
            conflict_factor: 1.0,
            ..Default::default()
        });

        let hints = workload.dependency_hints();
        assert_eq!(hints.len(), 30);
        assert!(hints[0].is_empty());

        for (index, deps) in hints.iter().enumerate() {
            let tx = &workload.transactions[index];
            for &dep in deps {
                assert!(dep < index);
                let prev = &workload.transactions[dep];
                let touched = [prev.from, prev.to];
                assert!(touched.contains(&tx.from) || touched.contains(&tx.to));
            }
        }
    }

    #[test]
    fn test_tasks_carry_hints_only_when_requested() {
        use block_stm_executor::ExecTask;

        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 3,
            num_transactions: 10,
            ..Default::default()
        });
        let genesis = Arc::new(workload.genesis());
        let settled = Arc::new(SettledState::from_genesis(&genesis));

        let plain = workload.tasks(true, false, &genesis, &settled);
        assert!(plain.iter().all(|task| task.dependencies().is_empty()));

        let hinted = workload.tasks(true, true, &genesis, &settled);
        let expected = workload.dependency_hints();
        for (task, deps) in hinted.iter().zip(expected) {
            assert_eq!(task.dependencies(), deps);
        }
    }
}
