//! Bounded fan-out credit of reconciled recipients
//!
//! One wave produces exactly one drop submission. When the batch does not
//! fit the distributor's cost headroom, recipients are removed from the end
//! of the list (CSV order) one at a time until it fits. Every removal is
//! logged and returned so the operator can pay those holders later.

use ethereum_types::{Address, U256};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::address::to_checksum;
use crate::amount::format_amount;
use crate::error::MigrationError;
use crate::ledger_client::{ActingAs, LedgerClient, LedgerCommand, ScopedClient};
use crate::types::{sum_balances, DistributionBatch, Receipt, Recipient};

/// Outcome of a distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionOutcome {
    pub total_distributed: U256,
    pub count: usize,
    /// Recipients removed by the shortfall policy, last-dropped last
    pub dropped: Vec<Recipient>,
    /// Cost across the pointer update (if any) and the drop
    pub cost_used: U256,
    pub effective_unit_price: U256,
    pub receipt: Option<Receipt>,
}

pub struct BatchDistributor {
    client: Arc<dyn LedgerClient>,
    distributor: Address,
    max_batch_cost: U256,
    decimals: u8,
    allow_repoint: bool,
}

impl BatchDistributor {
    pub fn new(client: Arc<dyn LedgerClient>, distributor: Address, max_batch_cost: U256) -> Self {
        Self {
            client,
            distributor,
            max_batch_cost,
            decimals: 18,
            allow_repoint: false,
        }
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    /// Allow replacing a pointer that is already set to another vault
    pub fn with_allow_repoint(mut self, allow_repoint: bool) -> Self {
        self.allow_repoint = allow_repoint;
        self
    }

    pub fn distributor(&self) -> Address {
        self.distributor
    }

    /// Credit `recipients` from the distributor's holdings on `vault_pointer`.
    pub async fn distribute(
        &self,
        vault_pointer: Address,
        recipients: &[Recipient],
        dropper: Address,
    ) -> Result<DistributionOutcome, MigrationError> {
        let scoped = self.client.acting_as(dropper);
        let mut cost_used = U256::zero();

        if let Some(receipt) = self.ensure_vault_pointer(&scoped, vault_pointer).await? {
            cost_used = cost_used.saturating_add(receipt.cost_used);
        }

        let mut kept: Vec<Recipient> = recipients.iter().filter(|r| !r.balance.is_zero()).cloned().collect();
        let filtered = recipients.len() - kept.len();
        if filtered > 0 {
            info!(filtered, "Filtered zero-balance recipients");
        }

        if kept.is_empty() {
            info!("No recipients with a positive balance; nothing to distribute");
            return Ok(DistributionOutcome {
                total_distributed: U256::zero(),
                count: 0,
                dropped: Vec::new(),
                cost_used,
                effective_unit_price: U256::zero(),
                receipt: None,
            });
        }

        let required = sum_balances(&kept);
        let available = self.client.read_balance(vault_pointer, self.distributor).await?;
        if required > available {
            return Err(MigrationError::InsufficientFunds { required, available });
        }

        let (batch, dropped) = self.trim_to_headroom(&scoped, vault_pointer, &mut kept).await?;

        // The pointer is shared state; confirm it right before the drop
        let current = self.client.read_vault_pointer(self.distributor).await?;
        if current != vault_pointer {
            return Err(MigrationError::VaultPointerMismatch {
                expected: vault_pointer,
                actual: current,
            });
        }

        let total_distributed = batch.total_balances;
        let count = batch.len();
        let receipt = scoped
            .submit(self.distributor, LedgerCommand::Drop { batch })
            .await?;
        cost_used = cost_used.saturating_add(receipt.cost_used);

        info!(
            count,
            total = %format_amount(total_distributed, self.decimals),
            dropped = dropped.len(),
            cost_used = %cost_used,
            unit_price = %receipt.effective_unit_price,
            tx = ?receipt.tx_hash,
            "Distribution submitted"
        );

        Ok(DistributionOutcome {
            total_distributed,
            count,
            dropped,
            cost_used,
            effective_unit_price: receipt.effective_unit_price,
            receipt: Some(receipt),
        })
    }

    /// Point the distributor at `vault_pointer` unless it already is.
    ///
    /// An unset pointer is always set. A pointer aimed at some other vault is
    /// only replaced when re-pointing was allowed explicitly.
    async fn ensure_vault_pointer(
        &self,
        scoped: &ScopedClient,
        vault_pointer: Address,
    ) -> Result<Option<Receipt>, MigrationError> {
        let current = self.client.read_vault_pointer(self.distributor).await?;
        if current == vault_pointer {
            return Ok(None);
        }
        if !current.is_zero() && !self.allow_repoint {
            return Err(MigrationError::VaultPointerMismatch {
                expected: vault_pointer,
                actual: current,
            });
        }

        info!(
            from = %to_checksum(&current),
            to = %to_checksum(&vault_pointer),
            "Updating distributor vault pointer"
        );
        let receipt = scoped
            .submit(self.distributor, LedgerCommand::SetVault { vault: vault_pointer })
            .await?;
        Ok(Some(receipt))
    }

    /// Drop the last recipient until the batch estimate fits the headroom.
    async fn trim_to_headroom(
        &self,
        scoped: &ScopedClient,
        vault_pointer: Address,
        kept: &mut Vec<Recipient>,
    ) -> Result<(DistributionBatch, Vec<Recipient>), MigrationError> {
        let mut dropped = Vec::new();
        loop {
            let batch = DistributionBatch::from_recipients(vault_pointer, kept)?;
            let command = LedgerCommand::Drop { batch: batch.clone() };
            let estimated = scoped.estimate_cost(self.distributor, &command).await?;
            if estimated <= self.max_batch_cost {
                return Ok((batch, dropped));
            }

            if kept.len() == 1 {
                return Err(MigrationError::Shortfall {
                    estimated,
                    headroom: self.max_batch_cost,
                    remaining: 1,
                });
            }

            if let Some(last) = kept.pop() {
                warn!(
                    receiver = %to_checksum(&last.address),
                    balance = %format_amount(last.balance, self.decimals),
                    estimated = %estimated,
                    headroom = %self.max_batch_cost,
                    "Shortfall: dropping last recipient from batch"
                );
                dropped.push(last);
            }
        }
    }
}

#[allow(dead_code)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_ledger::{InMemoryLedger, LedgerAddresses};

    fn holder(n: u64) -> Address {
        Address::from_low_u64_be(0xb000 + n)
    }

    fn setup(max_batch_cost: u64) -> (Arc<InMemoryLedger>, BatchDistributor) {
        let ledger = Arc::new(InMemoryLedger::new(LedgerAddresses::default()));
        let a = ledger.addresses();
        let client: Arc<dyn LedgerClient> = ledger.clone();
        let distributor = BatchDistributor::new(client, a.distributor, U256::from(max_batch_cost)).with_decimals(0);
        (ledger, distributor)
    }

    #[tokio::test]
    async fn test_sets_pointer_and_filters_zero() {
        let (ledger, distributor) = setup(10_000_000);
        let a = ledger.addresses();
        ledger.set_balance(a.target_vault, a.distributor, U256::from(100u64));

        let recipients = vec![
            Recipient::new(holder(1), U256::from(60u64)),
            Recipient::new(holder(2), U256::zero()),
            Recipient::new(holder(3), U256::from(40u64)),
        ];
        let outcome = distributor.distribute(a.target_vault, &recipients, a.operator).await.unwrap();

        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.total_distributed, U256::from(100u64));
        assert_eq!(ledger.submitted(), vec!["setVault", "drop"]);
        assert_eq!(ledger.balance_of(a.target_vault, holder(3)), U256::from(40u64));
        assert_eq!(ledger.balance_of(a.target_vault, a.distributor), U256::zero());
    }

    #[tokio::test]
    async fn test_pointer_already_set_is_not_resubmitted() {
        let (ledger, distributor) = setup(10_000_000);
        let a = ledger.addresses();
        ledger.set_vault_pointer(a.target_vault);
        ledger.set_balance(a.target_vault, a.distributor, U256::from(5u64));

        distributor
            .distribute(a.target_vault, &[Recipient::new(holder(1), U256::from(5u64))], a.operator)
            .await
            .unwrap();
        assert_eq!(ledger.submitted(), vec!["drop"]);
    }

    #[tokio::test]
    async fn test_foreign_pointer_is_not_overwritten() {
        let (ledger, distributor) = setup(10_000_000);
        let a = ledger.addresses();
        ledger.set_vault_pointer(a.legacy_vault);
        ledger.set_balance(a.target_vault, a.distributor, U256::from(5u64));

        let err = distributor
            .distribute(a.target_vault, &[Recipient::new(holder(1), U256::from(5u64))], a.operator)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MigrationError::VaultPointerMismatch { expected, actual }
                if expected == a.target_vault && actual == a.legacy_vault
        ));
        assert!(ledger.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_pointer_replaced_when_allowed() {
        let (ledger, distributor) = setup(10_000_000);
        let a = ledger.addresses();
        let distributor = distributor.with_allow_repoint(true);
        ledger.set_vault_pointer(a.legacy_vault);
        ledger.set_balance(a.target_vault, a.distributor, U256::from(5u64));

        distributor
            .distribute(a.target_vault, &[Recipient::new(holder(1), U256::from(5u64))], a.operator)
            .await
            .unwrap();
        assert_eq!(ledger.submitted(), vec!["setVault", "drop"]);
    }

    #[tokio::test]
    async fn test_insufficient_funds_blocks_submission() {
        let (ledger, distributor) = setup(10_000_000);
        let a = ledger.addresses();
        ledger.set_vault_pointer(a.target_vault);
        ledger.set_balance(a.target_vault, a.distributor, U256::from(5u64));

        let err = distributor
            .distribute(a.target_vault, &[Recipient::new(holder(1), U256::from(6u64))], a.operator)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::InsufficientFunds { .. }));
        assert!(ledger.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_shortfall_drops_last_recipients_in_order() {
        // base 50k + 30k per recipient; 150k headroom fits three
        let (ledger, distributor) = setup(150_000);
        let a = ledger.addresses();
        ledger.set_vault_pointer(a.target_vault);
        ledger.set_balance(a.target_vault, a.distributor, U256::from(1_000u64));

        let recipients: Vec<Recipient> = (1..=5).map(|n| Recipient::new(holder(n), U256::from(n * 10))).collect();
        let outcome = distributor.distribute(a.target_vault, &recipients, a.operator).await.unwrap();

        assert_eq!(outcome.count, 3);
        assert_eq!(outcome.total_distributed, U256::from(60u64));
        assert_eq!(outcome.dropped, vec![recipients[4].clone(), recipients[3].clone()]);
        assert_eq!(
            outcome.total_distributed + sum_balances(&outcome.dropped),
            sum_balances(&recipients)
        );
    }

    #[tokio::test]
    async fn test_shortfall_with_single_recipient_fails() {
        let (ledger, distributor) = setup(10);
        let a = ledger.addresses();
        ledger.set_vault_pointer(a.target_vault);
        ledger.set_balance(a.target_vault, a.distributor, U256::from(1u64));

        let err = distributor
            .distribute(a.target_vault, &[Recipient::new(holder(1), U256::one())], a.operator)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Shortfall { remaining: 1, .. }));
        assert!(ledger.submitted().is_empty());
    }
}
