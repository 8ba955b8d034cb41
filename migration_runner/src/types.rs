//! Core types shared by the migration, reconciliation and distribution stages

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::to_checksum;
use crate::error::MigrationError;

/// Legacy vault state read at a single reference block.
///
/// `block_timestamp` is the timestamp of `as_of_block` itself; seed
/// computation is only meaningful when both come from the same block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub as_of_block: u64,
    pub block_timestamp: u64,
    pub last_report_timestamp: u64,
    pub locked_profit: U256,
    pub locked_profit_degradation_rate: U256,
    pub total_assets: U256,
    pub total_supply: U256,
}

/// Values used to bootstrap the target vault's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionSeed {
    pub total_supply_to_inject: U256,
    pub free_funds_to_inject: U256,
}

/// A holder and the raw-unit balance owed to them in one wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: Address,
    pub balance: U256,
}

impl Recipient {
    pub fn new(address: Address, balance: U256) -> Self {
        Self { address, balance }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", to_checksum(&self.address), self.balance)
    }
}

/// Why a reconciliation row needs operator attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Discrepancy {
    /// Registered in the migration contract but absent from the curated CSV
    NotInSnapshot,
    /// In the CSV but not registered; carried to a later wave
    NotRegistered,
    /// CSV estimate disagrees with the live legacy balance
    BalanceMismatch { snapshot: U256, live: U256 },
    /// Address appeared more than once in the CSV; first row kept
    DuplicateSnapshotRow { ignored_balance: U256 },
    /// Registered, but the allowance cannot cover the live balance yet
    AllowanceShortfall { required: U256, granted: U256 },
    /// Withdrawn by the registry before this pass; paid in an earlier wave
    AlreadyMigrated,
}

/// One holder's cross-check of CSV snapshot against live ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRow {
    pub receiver: Address,
    pub legacy_balance: U256,
    pub allowance_to_migration: U256,
    pub included_in_registry: bool,
    pub registered_balance: U256,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconciliationRow {
    /// Balance owed when resolved: the registry's figure wins over the live one.
    pub fn resolved_balance(&self) -> U256 {
        if self.registered_balance.is_zero() {
            self.legacy_balance
        } else {
            self.registered_balance
        }
    }
}

/// A single fan-out credit submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionBatch {
    pub vault_pointer: Address,
    pub accounts: Vec<Address>,
    pub balances: Vec<U256>,
    pub total_balances: U256,
}

impl DistributionBatch {
    /// Build a batch, enforcing non-empty input and strictly positive balances.
    pub fn from_recipients(vault_pointer: Address, recipients: &[Recipient]) -> Result<Self, MigrationError> {
        if recipients.is_empty() {
            return Err(MigrationError::InvalidBatch("batch has no recipients".to_string()));
        }

        let mut accounts = Vec::with_capacity(recipients.len());
        let mut balances = Vec::with_capacity(recipients.len());
        let mut total = U256::zero();
        for recipient in recipients {
            if recipient.balance.is_zero() {
                return Err(MigrationError::InvalidBatch(format!(
                    "zero balance for {}",
                    to_checksum(&recipient.address)
                )));
            }
            total = total
                .checked_add(recipient.balance)
                .ok_or_else(|| MigrationError::InvalidBatch("batch total overflows uint256".to_string()))?;
            accounts.push(recipient.address);
            balances.push(recipient.balance);
        }

        Ok(Self {
            vault_pointer,
            accounts,
            balances,
            total_balances: total,
        })
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Terminal receipt of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: H256,
    pub block_number: u64,
    /// Gas-equivalent cost consumed
    pub cost_used: U256,
    /// Price paid per unit of cost
    pub effective_unit_price: U256,
}

impl Receipt {
    pub fn total_fee(&self) -> U256 {
        self.cost_used.saturating_mul(self.effective_unit_price)
    }
}

/// Migration wave progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveState {
    Idle,
    Withdrawn,
    Injected,
    LimitRaised,
    Deposited,
    EmergencyExited,
    Distributed,
}

impl WaveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveState::Idle => "idle",
            WaveState::Withdrawn => "withdrawn",
            WaveState::Injected => "injected",
            WaveState::LimitRaised => "limit_raised",
            WaveState::Deposited => "deposited",
            WaveState::EmergencyExited => "emergency_exited",
            WaveState::Distributed => "distributed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WaveState::Distributed)
    }
}

impl fmt::Display for WaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sum of balances, saturating at `U256::MAX`.
pub fn sum_balances<'a>(recipients: impl IntoIterator<Item = &'a Recipient>) -> U256 {
    recipients
        .into_iter()
        .fold(U256::zero(), |acc, r| acc.saturating_add(r.balance))
}

#[allow(dead_code)]
#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(byte: u8, balance: u64) -> Recipient {
        Recipient::new(Address::repeat_byte(byte), U256::from(balance))
    }

    #[test]
    fn test_batch_totals_and_lengths() {
        let recipients = vec![recipient(1, 10), recipient(2, 32)];
        let batch = DistributionBatch::from_recipients(Address::repeat_byte(9), &recipients).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.accounts.len(), batch.balances.len());
        assert_eq!(batch.total_balances, U256::from(42u64));
    }

    #[test]
    fn test_batch_rejects_zero_and_empty() {
        let err = DistributionBatch::from_recipients(Address::zero(), &[recipient(1, 0)]);
        assert!(matches!(err, Err(MigrationError::InvalidBatch(_))));
        assert!(DistributionBatch::from_recipients(Address::zero(), &[]).is_err());
    }

    #[test]
    fn test_resolved_balance_prefers_registry() {
        let mut row = ReconciliationRow {
            receiver: Address::repeat_byte(3),
            legacy_balance: U256::from(100u64),
            allowance_to_migration: U256::zero(),
            included_in_registry: true,
            registered_balance: U256::from(90u64),
            discrepancies: Vec::new(),
        };
        assert_eq!(row.resolved_balance(), U256::from(90u64));
        row.registered_balance = U256::zero();
        assert_eq!(row.resolved_balance(), U256::from(100u64));
    }

    #[test]
    fn test_wave_state_ordering() {
        assert!(WaveState::Idle < WaveState::Withdrawn);
        assert!(WaveState::EmergencyExited < WaveState::Distributed);
        assert!(WaveState::Distributed.is_terminal());
    }
}
