//! Account state seen by transfer transactions.
//!
//! [`GenesisState`] is the read-only state before the block; [`SettledState`]
//! accumulates the effects of settled transactions, in block order.

use alloy_primitives::{Address, U256};
use block_stm_executor::{BaseState, Key, SubPath, TxnIndex, TxnOutput};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Value of one tracked account location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateValue {
    Balance(U256),
    Nonce(u64),
}

impl StateValue {
    pub fn balance(&self) -> Option<U256> {
        match self {
            StateValue::Balance(balance) => Some(*balance),
            StateValue::Nonce(_) => None,
        }
    }

    pub fn nonce(&self) -> Option<u64> {
        match self {
            StateValue::Nonce(nonce) => Some(*nonce),
            StateValue::Balance(_) => None,
        }
    }
}

/// Nonce and balance of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
}

impl AccountState {
    pub fn new(nonce: u64, balance: U256) -> Self {
        Self { nonce, balance }
    }

    /// Applies a written location of this account.
    fn apply(&mut self, value: StateValue) {
        match value {
            StateValue::Balance(balance) => self.balance = balance,
            StateValue::Nonce(nonce) => self.nonce = nonce,
        }
    }
}

/// Accounts as they were before the block.
#[derive(Debug, Clone, Default)]
pub struct GenesisState {
    accounts: HashMap<Address, AccountState>,
}

impl GenesisState {
    pub fn new(accounts: HashMap<Address, AccountState>) -> Self {
        Self { accounts }
    }

    pub fn account(&self, address: &Address) -> Option<AccountState> {
        self.accounts.get(address).copied()
    }

    pub fn accounts(&self) -> &HashMap<Address, AccountState> {
        &self.accounts
    }
}

impl BaseState<StateValue> for GenesisState {
    fn get(&self, key: &Key) -> Option<StateValue> {
        let Key::SubPath(address, path) = key else {
            return None;
        };
        let account = self.accounts.get(address)?;

        match path {
            SubPath::Balance => Some(StateValue::Balance(account.balance)),
            SubPath::Nonce => Some(StateValue::Nonce(account.nonce)),
            SubPath::Code | SubPath::Suicide => None,
        }
    }
}

/// Why a transfer did not move any value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertReason {
    NonceMismatch { expected: u64, actual: u64 },
    InsufficientBalance { balance: U256, value: U256 },
}

/// Outcome of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Reverted(RevertReason),
}

impl TxStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TxStatus::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub index: TxnIndex,
    pub from: Address,
    pub to: Address,
    pub status: TxStatus,
}

/// Post-block state, built up as transactions settle.
#[derive(Debug, Default)]
pub struct SettledState {
    accounts: Mutex<HashMap<Address, AccountState>>,
    receipts: Mutex<Vec<Receipt>>,
}

impl SettledState {
    /// Starts from the accounts of `genesis`.
    pub fn from_genesis(genesis: &GenesisState) -> Self {
        Self {
            accounts: Mutex::new(genesis.accounts().clone()),
            receipts: Mutex::new(Vec::new()),
        }
    }

    /// Applies the final writes and receipt of one transaction.
    pub fn commit(&self, writes: &TxnOutput<StateValue>, receipt: Receipt) {
        let mut accounts = self.accounts.lock();
        for w in writes {
            accounts.entry(w.key.owner()).or_default().apply(w.value);
        }
        self.receipts.lock().push(receipt);
    }

    pub fn account(&self, address: &Address) -> Option<AccountState> {
        self.accounts.lock().get(address).copied()
    }

    pub fn accounts(&self) -> HashMap<Address, AccountState> {
        self.accounts.lock().clone()
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts.lock().clone()
    }
}
