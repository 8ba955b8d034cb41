//! In-memory ledger simulation
//!
//! Models the four contracts a wave touches (legacy vault, migration
//! registry, target vault, distributor) closely enough to exercise the
//! orchestration logic end to end, including scripted submit failures.

use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tracing::debug;

use crate::error::LedgerError;
use crate::ledger_client::{LedgerClient, LedgerCommand};
use crate::types::{LedgerSnapshot, Receipt};

/// Contract and identity addresses the simulation recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerAddresses {
    pub legacy_vault: Address,
    pub target_vault: Address,
    pub registry: Address,
    pub distributor: Address,
    pub treasury: Address,
    pub operator: Address,
}

impl Default for LedgerAddresses {
    fn default() -> Self {
        Self {
            legacy_vault: Address::from_low_u64_be(0x1001),
            target_vault: Address::from_low_u64_be(0x1002),
            registry: Address::from_low_u64_be(0x1003),
            distributor: Address::from_low_u64_be(0x1004),
            treasury: Address::from_low_u64_be(0x1005),
            operator: Address::from_low_u64_be(0x1006),
        }
    }
}

/// How a scripted failure behaves
#[derive(Debug, Clone)]
enum ScriptedFailure {
    /// Fail before the command takes effect
    Before(LedgerError),
    /// Apply the command, then report a timeout (receipt lost in transit)
    TimeoutAfterApply,
}

#[derive(Debug)]
struct LedgerState {
    block_number: u64,
    snapshot: LedgerSnapshot,
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    members: Vec<Address>,
    registered: HashMap<Address, U256>,
    withdrawn: HashSet<Address>,
    injected: Option<(U256, U256)>,
    deposit_limit: U256,
    total_deposited: U256,
    exited: bool,
    vault_pointer: Address,
    drop_base_cost: U256,
    drop_cost_per_recipient: U256,
    unit_price: U256,
    failures: VecDeque<(&'static str, ScriptedFailure)>,
    submissions: Vec<(Address, Address, LedgerCommand)>,
    reads: HashMap<&'static str, u64>,
}

/// Deterministic in-memory implementation of [`LedgerClient`]
pub struct InMemoryLedger {
    addresses: LedgerAddresses,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(addresses: LedgerAddresses) -> Self {
        Self {
            addresses,
            state: Mutex::new(LedgerState {
                block_number: 1,
                snapshot: LedgerSnapshot {
                    as_of_block: 0,
                    block_timestamp: 0,
                    last_report_timestamp: 0,
                    locked_profit: U256::zero(),
                    locked_profit_degradation_rate: U256::zero(),
                    total_assets: U256::zero(),
                    total_supply: U256::zero(),
                },
                balances: HashMap::new(),
                allowances: HashMap::new(),
                members: Vec::new(),
                registered: HashMap::new(),
                withdrawn: HashSet::new(),
                injected: None,
                deposit_limit: U256::zero(),
                total_deposited: U256::zero(),
                exited: false,
                vault_pointer: Address::zero(),
                drop_base_cost: U256::from(50_000u64),
                drop_cost_per_recipient: U256::from(30_000u64),
                unit_price: U256::from(1_000_000_000u64),
                failures: VecDeque::new(),
                submissions: Vec::new(),
                reads: HashMap::new(),
            }),
        }
    }

    pub fn addresses(&self) -> LedgerAddresses {
        self.addresses
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn count_read(&self, kind: &'static str) -> MutexGuard<'_, LedgerState> {
        let mut state = self.state();
        *state.reads.entry(kind).or_insert(0) += 1;
        state
    }

    // ---- setup ----

    /// Legacy vault fields returned by `read_snapshot`
    pub fn set_snapshot(&self, snapshot: LedgerSnapshot) {
        self.state().snapshot = snapshot;
    }

    pub fn set_balance(&self, token: Address, holder: Address, amount: U256) {
        self.state().balances.insert((token, holder), amount);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.state().allowances.insert((token, owner, spender), amount);
    }

    /// Append a holder to the registry with its registered balance
    pub fn register_member(&self, holder: Address, registered_balance: U256) {
        let mut state = self.state();
        state.members.push(holder);
        state.registered.insert(holder, registered_balance);
    }

    /// Register a holder, fund it on the legacy vault and optionally approve the registry
    pub fn add_legacy_holder(&self, holder: Address, balance: U256, approved: bool) {
        let a = self.addresses;
        self.register_member(holder, balance);
        self.set_balance(a.legacy_vault, holder, balance);
        if approved {
            self.set_allowance(a.legacy_vault, holder, a.registry, U256::MAX);
        }
    }

    pub fn set_vault_pointer(&self, pointer: Address) {
        self.state().vault_pointer = pointer;
    }

    pub fn set_drop_cost(&self, base: u64, per_recipient: u64) {
        let mut state = self.state();
        state.drop_base_cost = U256::from(base);
        state.drop_cost_per_recipient = U256::from(per_recipient);
    }

    /// Make the next submit of `command` fail without taking effect
    pub fn fail_next(&self, command: &'static str, error: LedgerError) {
        self.state().failures.push_back((command, ScriptedFailure::Before(error)));
    }

    /// Make the next submit of `command` take effect but report a timeout
    pub fn timeout_after_apply(&self, command: &'static str) {
        self.state().failures.push_back((command, ScriptedFailure::TimeoutAfterApply));
    }

    // ---- inspection ----

    pub fn balance_of(&self, token: Address, holder: Address) -> U256 {
        self.state().balances.get(&(token, holder)).copied().unwrap_or_default()
    }

    /// Seed applied to the target vault, if any
    pub fn injected_seed(&self) -> Option<(U256, U256)> {
        self.state().injected
    }

    pub fn deposit_limit(&self) -> U256 {
        self.state().deposit_limit
    }

    pub fn is_exited(&self) -> bool {
        self.state().exited
    }

    /// Names of accepted submissions, in order
    pub fn submitted(&self) -> Vec<&'static str> {
        self.state().submissions.iter().map(|(_, _, c)| c.name()).collect()
    }

    pub fn submissions(&self) -> Vec<(Address, Address, LedgerCommand)> {
        self.state().submissions.clone()
    }

    pub fn read_count(&self, kind: &'static str) -> u64 {
        self.state().reads.get(kind).copied().unwrap_or(0)
    }

    // ---- simulation ----

    fn credit(state: &mut LedgerState, token: Address, holder: Address, amount: U256) {
        let entry = state.balances.entry((token, holder)).or_insert_with(U256::zero);
        *entry = entry.saturating_add(amount);
    }

    fn debit(state: &mut LedgerState, token: Address, holder: Address, amount: U256, op: &str) -> Result<(), LedgerError> {
        let entry = state.balances.entry((token, holder)).or_insert_with(U256::zero);
        *entry = entry
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::rejected(op, "transfer amount exceeds balance"))?;
        Ok(())
    }

    fn withdraw_holders(&self, state: &mut LedgerState, holders: &[Address]) -> usize {
        let a = self.addresses;
        let mut moved = 0;
        for holder in holders {
            if state.withdrawn.contains(holder) {
                continue;
            }
            let balance = state.balances.get(&(a.legacy_vault, *holder)).copied().unwrap_or_default();
            let allowance = state
                .allowances
                .get(&(a.legacy_vault, *holder, a.registry))
                .copied()
                .unwrap_or_default();
            if balance.is_zero() || allowance < balance {
                continue;
            }
            state.balances.insert((a.legacy_vault, *holder), U256::zero());
            Self::credit(state, a.legacy_vault, a.registry, balance);
            state.withdrawn.insert(*holder);
            moved += 1;
        }
        moved
    }

    fn expect_ledger(&self, op: &str, ledger: Address, expected: Address) -> Result<(), LedgerError> {
        if ledger != expected {
            return Err(LedgerError::rejected(op, "command sent to the wrong contract"));
        }
        Ok(())
    }

    fn expect_operator(&self, op: &str, signer: Address) -> Result<(), LedgerError> {
        if signer != self.addresses.operator {
            return Err(LedgerError::rejected(op, "caller is not the operator"));
        }
        Ok(())
    }

    fn apply(&self, state: &mut LedgerState, signer: Address, ledger: Address, command: &LedgerCommand) -> Result<(), LedgerError> {
        let a = self.addresses;
        let op = command.name();
        match command {
            LedgerCommand::Withdraw => {
                self.expect_ledger(op, ledger, a.registry)?;
                self.expect_operator(op, signer)?;
                let members = state.members.clone();
                let moved = self.withdraw_holders(state, &members);
                debug!(moved, "Simulated registry withdraw");
            }
            LedgerCommand::WithdrawUsersWithDetectedError { users } => {
                self.expect_ledger(op, ledger, a.registry)?;
                self.expect_operator(op, signer)?;
                if let Some(stranger) = users.iter().find(|u| !state.members.contains(*u)) {
                    return Err(LedgerError::rejected(op, format!("{:?} is not registered", stranger)));
                }
                self.withdraw_holders(state, users);
            }
            LedgerCommand::InjectForMigration { seed } => {
                self.expect_ledger(op, ledger, a.target_vault)?;
                self.expect_operator(op, signer)?;
                if state.injected.is_some() {
                    return Err(LedgerError::rejected(op, "already injected"));
                }
                state.injected = Some((seed.total_supply_to_inject, seed.free_funds_to_inject));
            }
            LedgerCommand::SetDepositLimit { limit } => {
                self.expect_ledger(op, ledger, a.target_vault)?;
                self.expect_operator(op, signer)?;
                state.deposit_limit = *limit;
            }
            LedgerCommand::Deposit => {
                self.expect_ledger(op, ledger, a.registry)?;
                self.expect_operator(op, signer)?;
                if state.injected.is_none() {
                    return Err(LedgerError::rejected(op, "target vault not injected"));
                }
                let custody = state.balances.get(&(a.legacy_vault, a.registry)).copied().unwrap_or_default();
                let after = state.total_deposited.saturating_add(custody);
                if after > state.deposit_limit {
                    return Err(LedgerError::rejected(op, "deposit limit exceeded"));
                }
                state.balances.insert((a.legacy_vault, a.registry), U256::zero());
                state.total_deposited = after;
                Self::credit(state, a.target_vault, a.registry, custody);
            }
            LedgerCommand::EmergencyExit => {
                self.expect_ledger(op, ledger, a.registry)?;
                self.expect_operator(op, signer)?;
                let held = state.balances.get(&(a.target_vault, a.registry)).copied().unwrap_or_default();
                state.balances.insert((a.target_vault, a.registry), U256::zero());
                Self::credit(state, a.target_vault, a.treasury, held);
                state.exited = true;
            }
            LedgerCommand::Transfer { to, amount } => {
                self.expect_ledger(op, ledger, a.target_vault)?;
                Self::debit(state, a.target_vault, signer, *amount, op)?;
                Self::credit(state, a.target_vault, *to, *amount);
            }
            LedgerCommand::SetVault { vault } => {
                self.expect_ledger(op, ledger, a.distributor)?;
                self.expect_operator(op, signer)?;
                state.vault_pointer = *vault;
            }
            LedgerCommand::Drop { batch } => {
                self.expect_ledger(op, ledger, a.distributor)?;
                self.expect_operator(op, signer)?;
                if batch.vault_pointer != state.vault_pointer {
                    return Err(LedgerError::rejected(op, "vault pointer mismatch"));
                }
                if batch.accounts.len() != batch.balances.len() {
                    return Err(LedgerError::rejected(op, "length mismatch"));
                }
                let sum = batch.balances.iter().fold(U256::zero(), |acc, b| acc.saturating_add(*b));
                if sum != batch.total_balances {
                    return Err(LedgerError::rejected(op, "total does not match balances"));
                }
                Self::debit(state, batch.vault_pointer, a.distributor, sum, op)?;
                for (account, balance) in batch.accounts.iter().zip(batch.balances.iter()) {
                    Self::credit(state, batch.vault_pointer, *account, *balance);
                }
            }
        }
        Ok(())
    }

    fn cost_of(state: &LedgerState, command: &LedgerCommand) -> U256 {
        match command {
            LedgerCommand::Drop { batch } => state
                .drop_base_cost
                .saturating_add(state.drop_cost_per_recipient.saturating_mul(U256::from(batch.len()))),
            LedgerCommand::WithdrawUsersWithDetectedError { users } => {
                U256::from(60_000u64).saturating_add(U256::from(40_000u64).saturating_mul(U256::from(users.len())))
            }
            _ => U256::from(100_000u64),
        }
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn read_snapshot(&self, vault: Address, at_block: u64) -> Result<LedgerSnapshot, LedgerError> {
        let state = self.count_read("read_snapshot");
        if vault != self.addresses.legacy_vault {
            return Err(LedgerError::rejected("read_snapshot", "not the legacy vault"));
        }
        let mut snapshot = state.snapshot.clone();
        snapshot.as_of_block = at_block;
        Ok(snapshot)
    }

    async fn read_balance(&self, token: Address, holder: Address) -> Result<U256, LedgerError> {
        let state = self.count_read("read_balance");
        Ok(state.balances.get(&(token, holder)).copied().unwrap_or_default())
    }

    async fn read_allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, LedgerError> {
        let state = self.count_read("read_allowance");
        Ok(state.allowances.get(&(token, owner, spender)).copied().unwrap_or_default())
    }

    async fn read_registry_member(&self, registry: Address, index: u64) -> Result<Option<Address>, LedgerError> {
        let state = self.count_read("read_registry_member");
        if registry != self.addresses.registry {
            return Ok(None);
        }
        Ok(usize::try_from(index).ok().and_then(|i| state.members.get(i).copied()))
    }

    async fn read_registered_balance(&self, _registry: Address, holder: Address) -> Result<U256, LedgerError> {
        let state = self.count_read("read_registered_balance");
        Ok(state.registered.get(&holder).copied().unwrap_or_default())
    }

    async fn read_withdrawn(&self, _registry: Address, holder: Address) -> Result<bool, LedgerError> {
        let state = self.count_read("read_withdrawn");
        Ok(state.withdrawn.contains(&holder))
    }

    async fn read_injected_once(&self, _vault: Address) -> Result<bool, LedgerError> {
        let state = self.count_read("read_injected_once");
        Ok(state.injected.is_some())
    }

    async fn read_vault_pointer(&self, _distributor: Address) -> Result<Address, LedgerError> {
        let state = self.count_read("read_vault_pointer");
        Ok(state.vault_pointer)
    }

    async fn estimate_cost(
        &self,
        _signer: Address,
        _ledger: Address,
        command: &LedgerCommand,
    ) -> Result<U256, LedgerError> {
        let state = self.count_read("estimate_cost");
        Ok(Self::cost_of(&state, command))
    }

    async fn submit(&self, signer: Address, ledger: Address, command: LedgerCommand) -> Result<Receipt, LedgerError> {
        let mut state = self.state();
        let op = command.name();

        let scripted_at = state.failures.iter().position(|(name, _)| *name == op);
        let scripted = scripted_at
            .and_then(|i| state.failures.remove(i))
            .map(|(_, failure)| failure);

        if let Some(ScriptedFailure::Before(error)) = scripted {
            return Err(error);
        }

        self.apply(&mut state, signer, ledger, &command)?;

        let cost_used = Self::cost_of(&state, &command);
        let unit_price = state.unit_price;
        state.block_number += 1;
        let block_number = state.block_number;
        state.submissions.push((signer, ledger, command));

        if let Some(ScriptedFailure::TimeoutAfterApply) = scripted {
            return Err(LedgerError::Timeout {
                operation: op.to_string(),
                elapsed: Duration::from_secs(180),
            });
        }

        Ok(Receipt {
            tx_hash: H256::from_low_u64_be(block_number),
            block_number,
            cost_used,
            effective_unit_price: unit_price,
        })
    }
}
