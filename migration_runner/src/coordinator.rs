//! Migration wave state machine
//!
//! `Idle -> Withdrawn -> Injected -> LimitRaised -> Deposited ->
//! EmergencyExited -> Distributed`. The coordinator keeps no memory of
//! earlier runs: every transition re-reads the ledger before deciding what
//! to submit, so recovering from a crash is simply running the wave again.

use backoff::{backoff::Backoff, ExponentialBackoff};
use ethereum_types::{Address, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use crate::address::to_checksum;
use crate::amount::format_amount;
use crate::config::{ContractsConfig, RetryConfig};
use crate::distributor::{BatchDistributor, DistributionOutcome};
use crate::error::{LedgerError, MigrationError};
use crate::injection::compute_seed;
use crate::ledger_client::{ActingAs, LedgerClient, LedgerCommand, ScopedClient};
use crate::registry_scan::collect_members;
use crate::tracing_logger::{CostReport, OperationMetrics, WaveLogger};
use crate::types::{InjectionSeed, Receipt, Recipient, WaveState};

/// What one transition did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub state: WaveState,
    pub receipt: Option<Receipt>,
    /// Set when live state made the submit unnecessary
    pub skipped: Option<String>,
}

impl StepOutcome {
    fn submitted(state: WaveState, receipt: Receipt) -> Self {
        Self {
            state,
            receipt: Some(receipt),
            skipped: None,
        }
    }

    fn skipped(state: WaveState, reason: impl Into<String>) -> Self {
        Self {
            state,
            receipt: None,
            skipped: Some(reason.into()),
        }
    }

    pub fn was_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

impl CostReport for StepOutcome {
    fn cost_used(&self) -> U256 {
        self.receipt.as_ref().map(|r| r.cost_used).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionOutcome {
    pub step: StepOutcome,
    /// Seed submitted in this run; `None` when the vault was already injected
    pub seed: Option<InjectionSeed>,
}

impl CostReport for InjectionOutcome {
    fn cost_used(&self) -> U256 {
        self.step.cost_used()
    }
}

impl CostReport for DistributionOutcome {
    fn cost_used(&self) -> U256 {
        self.cost_used
    }
}

/// Result of a `withdrawUsersWithDetectedError` pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryOutcome {
    /// Holders the pass attempted
    pub users: Vec<Address>,
    /// Attempted holders with the legacy balance the registry pulled in
    pub recipients: Vec<Recipient>,
    /// Registered holders still not withdrawable (allowance below balance)
    pub still_blocked: Vec<Address>,
    pub withdraw: Option<Receipt>,
    pub deposit: Option<StepOutcome>,
}

impl RetryOutcome {
    pub fn is_noop(&self) -> bool {
        self.users.is_empty()
    }
}

impl CostReport for RetryOutcome {
    fn cost_used(&self) -> U256 {
        let withdraw = self.withdraw.as_ref().map(|r| r.cost_used).unwrap_or_default();
        let deposit = self.deposit.as_ref().map(|d| d.cost_used()).unwrap_or_default();
        withdraw.saturating_add(deposit)
    }
}

/// Summary of one `run_wave`
#[derive(Debug, Clone, Serialize)]
pub struct WaveReport {
    pub correlation_id: String,
    pub reached: WaveState,
    pub steps: Vec<StepOutcome>,
    pub seed: Option<InjectionSeed>,
    pub injection_skipped: bool,
    pub distribution: Option<DistributionOutcome>,
    pub metrics: Vec<OperationMetrics>,
}

impl WaveReport {
    fn record(&mut self, step: StepOutcome) {
        self.reached = self.reached.max(step.state);
        self.steps.push(step);
    }
}

/// Holder state read during the unresolved-subset derivation
#[derive(Debug)]
struct HolderStatus {
    holder: Address,
    withdrawn: bool,
    legacy_balance: U256,
    allowance: U256,
}

/// Registered holders not yet withdrawn, split by whether a withdraw would move them
#[derive(Debug, Default)]
struct Eligibility {
    withdrawable: Vec<HolderStatus>,
    blocked: Vec<Address>,
}

pub struct MigrationCoordinator {
    client: Arc<dyn LedgerClient>,
    contracts: ContractsConfig,
    reference_block: u64,
    max_users: u64,
    read_concurrency: usize,
    decimals: u8,
    retry: RetryConfig,
    distributor: BatchDistributor,
}

impl MigrationCoordinator {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        contracts: ContractsConfig,
        reference_block: u64,
        max_batch_cost: U256,
    ) -> Self {
        let distributor = BatchDistributor::new(Arc::clone(&client), contracts.distributor, max_batch_cost);
        Self {
            client,
            contracts,
            reference_block,
            max_users: 1000,
            read_concurrency: 16,
            decimals: 18,
            retry: RetryConfig::default(),
            distributor,
        }
    }

    pub fn with_max_users(mut self, max_users: u64) -> Self {
        self.max_users = max_users;
        self
    }

    pub fn with_read_concurrency(mut self, read_concurrency: usize) -> Self {
        self.read_concurrency = read_concurrency.max(1);
        self
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self.distributor = self.distributor.with_decimals(decimals);
        self
    }

    /// Let `distribute` replace a distributor pointer set to another vault
    pub fn with_allow_repoint(mut self, allow_repoint: bool) -> Self {
        self.distributor = self.distributor.with_allow_repoint(allow_repoint);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn operator(&self) -> ScopedClient {
        self.client.acting_as(self.contracts.operator)
    }

    fn treasury(&self) -> ScopedClient {
        self.client.acting_as(self.contracts.treasury)
    }

    /// Drive one full wave and pay `recipients` at the end.
    ///
    /// Stops at the first failed transition; the error carries the cause and
    /// the wave can be re-run from the start.
    pub async fn run_wave(&self, recipients: &[Recipient]) -> Result<WaveReport, MigrationError> {
        let logger = WaveLogger::new("migrate");
        let span = logger.span().clone();

        let result = self.run_wave_steps(&logger, recipients).instrument(span).await;
        logger.log_summary().await;

        let mut report = result?;
        report.metrics = logger.metrics().await;
        Ok(report)
    }

    async fn run_wave_steps(&self, logger: &WaveLogger, recipients: &[Recipient]) -> Result<WaveReport, MigrationError> {
        info!(
            reference_block = self.reference_block,
            recipients = recipients.len(),
            "Starting migration wave"
        );

        let mut report = WaveReport {
            correlation_id: logger.correlation_id().to_string(),
            reached: WaveState::Idle,
            steps: Vec::new(),
            seed: None,
            injection_skipped: false,
            distribution: None,
            metrics: Vec::new(),
        };

        report.record(logger.log_operation("withdraw", self.withdraw()).await?);

        let injection = logger.log_operation("inject", self.inject()).await?;
        report.injection_skipped = injection.step.was_skipped();
        report.seed = injection.seed;
        report.record(injection.step);

        report.record(logger.log_operation("raise_limit", self.raise_limit()).await?);
        report.record(logger.log_operation("deposit", self.deposit()).await?);
        report.record(logger.log_operation("emergency_exit", self.emergency_exit()).await?);
        report.record(
            logger
                .log_operation("transfer_to_distributor", self.transfer_to_distributor())
                .await?,
        );

        let distribution = logger.log_operation("distribute", self.distribute(recipients)).await?;
        info!(
            distributed = %format_amount(distribution.total_distributed, self.decimals),
            count = distribution.count,
            dropped = distribution.dropped.len(),
            "Migration wave complete"
        );
        report.reached = WaveState::Distributed;
        report.distribution = Some(distribution);

        Ok(report)
    }

    /// `Idle -> Withdrawn`: registry pulls every eligible holder into custody.
    pub async fn withdraw(&self) -> Result<StepOutcome, MigrationError> {
        self.retrying("withdraw", move || self.withdraw_once()).await
    }

    /// `Withdrawn -> Injected`: at most once per target vault.
    pub async fn inject(&self) -> Result<InjectionOutcome, MigrationError> {
        self.retrying("inject", move || self.inject_once()).await
    }

    /// `Injected -> LimitRaised`: deposit ceiling to the maximum.
    pub async fn raise_limit(&self) -> Result<StepOutcome, MigrationError> {
        self.retrying("raise_limit", move || self.raise_limit_once()).await
    }

    /// `LimitRaised -> Deposited`: move the registry's custody into the target vault.
    pub async fn deposit(&self) -> Result<StepOutcome, MigrationError> {
        self.retrying("deposit", move || self.deposit_once()).await
    }

    /// `Deposited -> EmergencyExited`: settle the registry, residual to treasury.
    /// Skipped when the registry holds no target-vault credit to route.
    pub async fn emergency_exit(&self) -> Result<StepOutcome, MigrationError> {
        self.retrying("emergency_exit", move || self.emergency_exit_once()).await
    }

    /// Treasury's target-vault credit to the distributor, signed by the treasury.
    pub async fn transfer_to_distributor(&self) -> Result<StepOutcome, MigrationError> {
        self.retrying("transfer_to_distributor", move || self.transfer_once()).await
    }

    async fn withdraw_once(&self) -> Result<StepOutcome, MigrationError> {
        let eligibility = self.eligibility().await?;
        if eligibility.withdrawable.is_empty() {
            info!(
                blocked = eligibility.blocked.len(),
                "No registered holder is withdrawable; skipping withdraw"
            );
            return Ok(StepOutcome::skipped(WaveState::Withdrawn, "nothing withdrawable"));
        }

        info!(holders = eligibility.withdrawable.len(), "Withdrawing registered holders");
        let receipt = self.operator().submit(self.contracts.registry, LedgerCommand::Withdraw).await?;
        info!(tx = ?receipt.tx_hash, "Registry withdraw confirmed");
        Ok(StepOutcome::submitted(WaveState::Withdrawn, receipt))
    }

    async fn inject_once(&self) -> Result<InjectionOutcome, MigrationError> {
        if self.client.read_injected_once(self.contracts.target_vault).await? {
            info!("Target vault already injected; skipping seed");
            return Ok(InjectionOutcome {
                step: StepOutcome::skipped(WaveState::Injected, "already injected"),
                seed: None,
            });
        }

        let snapshot = self
            .client
            .read_snapshot(self.contracts.legacy_vault, self.reference_block)
            .await?;
        let seed = compute_seed(&snapshot)?;

        info!(
            block = snapshot.as_of_block,
            total_supply = %seed.total_supply_to_inject,
            free_funds = %seed.free_funds_to_inject,
            "Injecting seed into target vault"
        );
        let receipt = self
            .operator()
            .submit(self.contracts.target_vault, LedgerCommand::InjectForMigration { seed })
            .await?;

        Ok(InjectionOutcome {
            step: StepOutcome::submitted(WaveState::Injected, receipt),
            seed: Some(seed),
        })
    }

    async fn raise_limit_once(&self) -> Result<StepOutcome, MigrationError> {
        let receipt = self
            .operator()
            .submit(self.contracts.target_vault, LedgerCommand::SetDepositLimit { limit: U256::MAX })
            .await?;
        Ok(StepOutcome::submitted(WaveState::LimitRaised, receipt))
    }

    async fn deposit_once(&self) -> Result<StepOutcome, MigrationError> {
        let custody = self
            .client
            .read_balance(self.contracts.legacy_vault, self.contracts.registry)
            .await?;
        if custody.is_zero() {
            info!("Registry holds no legacy custody; nothing to deposit");
            return Ok(StepOutcome::skipped(WaveState::Deposited, "no custody"));
        }

        info!(custody = %format_amount(custody, self.decimals), "Depositing registry custody");
        let receipt = self.operator().submit(self.contracts.registry, LedgerCommand::Deposit).await?;
        Ok(StepOutcome::submitted(WaveState::Deposited, receipt))
    }

    async fn emergency_exit_once(&self) -> Result<StepOutcome, MigrationError> {
        let held = self
            .client
            .read_balance(self.contracts.target_vault, self.contracts.registry)
            .await?;
        if held.is_zero() {
            info!("Registry holds no target-vault credit; nothing to settle");
            return Ok(StepOutcome::skipped(WaveState::EmergencyExited, "registry settled"));
        }

        info!(held = %format_amount(held, self.decimals), "Settling registry");
        let receipt = self
            .operator()
            .submit(self.contracts.registry, LedgerCommand::EmergencyExit)
            .await?;
        Ok(StepOutcome::submitted(WaveState::EmergencyExited, receipt))
    }

    async fn transfer_once(&self) -> Result<StepOutcome, MigrationError> {
        let amount = self
            .client
            .read_balance(self.contracts.target_vault, self.contracts.treasury)
            .await?;
        if amount.is_zero() {
            info!("Treasury holds no target-vault credit; nothing to transfer");
            return Ok(StepOutcome::skipped(WaveState::EmergencyExited, "treasury empty"));
        }

        info!(
            amount = %format_amount(amount, self.decimals),
            to = %to_checksum(&self.contracts.distributor),
            "Transferring treasury credit to distributor"
        );
        let receipt = self
            .treasury()
            .submit(
                self.contracts.target_vault,
                LedgerCommand::Transfer {
                    to: self.contracts.distributor,
                    amount,
                },
            )
            .await?;
        Ok(StepOutcome::submitted(WaveState::EmergencyExited, receipt))
    }

    async fn withdraw_users_once(&self, users: Vec<Address>) -> Result<Option<Receipt>, MigrationError> {
        // Other actors may have withdrawn some of these since the scan
        let mut pending = Vec::with_capacity(users.len());
        for user in users {
            if !self.client.read_withdrawn(self.contracts.registry, user).await? {
                pending.push(user);
            }
        }
        if pending.is_empty() {
            return Ok(None);
        }
        let command = LedgerCommand::WithdrawUsersWithDetectedError { users: pending };
        Ok(Some(self.operator().submit(self.contracts.registry, command).await?))
    }

    /// `EmergencyExited -> Distributed`. Not retried: a lost drop receipt
    /// needs an operator to check balances before paying again.
    pub async fn distribute(&self, recipients: &[Recipient]) -> Result<DistributionOutcome, MigrationError> {
        self.distributor
            .distribute(self.contracts.target_vault, recipients, self.contracts.operator)
            .await
    }

    /// Narrow withdrawal for registered holders who became eligible after
    /// the main withdraw, followed by a deposit of the new custody.
    ///
    /// A strict no-op when nobody new is eligible. Safe to call repeatedly.
    pub async fn retry_unresolved(&self) -> Result<RetryOutcome, MigrationError> {
        let Eligibility {
            withdrawable,
            blocked: still_blocked,
        } = self.eligibility().await?;
        let users: Vec<Address> = withdrawable.iter().map(|s| s.holder).collect();
        let recipients: Vec<Recipient> = withdrawable
            .iter()
            .map(|s| Recipient::new(s.holder, s.legacy_balance))
            .collect();

        if !still_blocked.is_empty() {
            warn!(count = still_blocked.len(), "Registered holders still lack sufficient allowance");
        }

        if users.is_empty() {
            info!("No newly eligible holders; retry pass is a no-op");
            return Ok(RetryOutcome {
                users,
                recipients,
                still_blocked,
                withdraw: None,
                deposit: None,
            });
        }

        info!(count = users.len(), "Withdrawing newly eligible holders");
        let attempted = &users;
        let withdraw = self
            .retrying("withdraw_users_with_detected_error", move || {
                self.withdraw_users_once(attempted.clone())
            })
            .await?;

        let deposit = self.deposit().await?;

        Ok(RetryOutcome {
            users,
            recipients,
            still_blocked,
            withdraw,
            deposit: Some(deposit),
        })
    }

    /// Re-derive the unwithdrawn part of the registry from live reads
    async fn eligibility(&self) -> Result<Eligibility, MigrationError> {
        let members = collect_members(Arc::clone(&self.client), self.contracts.registry, self.max_users).await?;

        let statuses: Vec<HolderStatus> = stream::iter(members.iter().map(|m| self.holder_status(*m)))
            .buffered(self.read_concurrency)
            .try_collect()
            .await?;

        let mut eligibility = Eligibility::default();
        for status in statuses.into_iter().filter(|s| !s.withdrawn && !s.legacy_balance.is_zero()) {
            if status.allowance >= status.legacy_balance {
                eligibility.withdrawable.push(status);
            } else {
                eligibility.blocked.push(status.holder);
            }
        }
        Ok(eligibility)
    }

    async fn holder_status(&self, holder: Address) -> Result<HolderStatus, LedgerError> {
        let (withdrawn, legacy_balance, allowance) = futures::try_join!(
            self.client.read_withdrawn(self.contracts.registry, holder),
            self.client.read_balance(self.contracts.legacy_vault, holder),
            self.client
                .read_allowance(self.contracts.legacy_vault, holder, self.contracts.registry),
        )?;
        Ok(HolderStatus {
            holder,
            withdrawn,
            legacy_balance,
            allowance,
        })
    }

    /// Re-run `attempt` on retryable ledger failures with exponential backoff.
    ///
    /// Every transition routed through here reads the live state its submit
    /// changes before submitting, so a submit that landed before its receipt
    /// was lost is observed and not repeated.
    async fn retrying<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigrationError>>,
    {
        let mut backoff = ExponentialBackoff {
            current_interval: self.retry.initial_interval,
            initial_interval: self.retry.initial_interval,
            max_interval: self.retry.max_interval,
            multiplier: self.retry.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(MigrationError::Ledger(e)) if e.is_retryable() => {
                    if attempts > self.retry.max_retries {
                        return Err(MigrationError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts,
                            last_error: e,
                        });
                    }
                    let wait = backoff.next_backoff().unwrap_or(self.retry.max_interval);
                    warn!(
                        operation,
                        attempt = attempts,
                        error = %e,
                        "Retryable ledger failure, retrying in {:?}",
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[allow(dead_code)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_ledger::{InMemoryLedger, LedgerAddresses};
    use crate::types::LedgerSnapshot;
    use std::time::Duration;

    fn holder(n: u64) -> Address {
        Address::from_low_u64_be(0xc000 + n)
    }

    fn contracts(a: LedgerAddresses) -> ContractsConfig {
        ContractsConfig {
            legacy_vault: a.legacy_vault,
            target_vault: a.target_vault,
            registry: a.registry,
            distributor: a.distributor,
            treasury: a.treasury,
            operator: a.operator,
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    fn setup() -> (Arc<InMemoryLedger>, MigrationCoordinator) {
        let ledger = Arc::new(InMemoryLedger::new(LedgerAddresses::default()));
        ledger.set_snapshot(LedgerSnapshot {
            as_of_block: 0,
            block_timestamp: 1_000,
            last_report_timestamp: 1_000,
            locked_profit: U256::from(1_000u64),
            locked_profit_degradation_rate: U256::from(46_000_000_000_000_000u64),
            total_assets: U256::from(5_000u64),
            total_supply: U256::from(2_000u64),
        });
        let client: Arc<dyn LedgerClient> = ledger.clone();
        let coordinator = MigrationCoordinator::new(client, contracts(ledger.addresses()), 100, U256::from(10_000_000u64))
            .with_decimals(0)
            .with_retry(fast_retry(3));
        (ledger, coordinator)
    }

    #[tokio::test]
    async fn test_inject_twice_applies_once() {
        let (ledger, coordinator) = setup();

        let first = coordinator.inject().await.unwrap();
        let second = coordinator.inject().await.unwrap();

        assert_eq!(
            first.seed,
            Some(InjectionSeed {
                total_supply_to_inject: U256::from(2_000u64),
                free_funds_to_inject: U256::from(4_000u64),
            })
        );
        assert!(second.step.was_skipped());
        assert!(second.seed.is_none());
        assert_eq!(ledger.submitted(), vec!["injectForMigration"]);
    }

    #[tokio::test]
    async fn test_deposit_without_custody_is_noop() {
        let (ledger, coordinator) = setup();
        let step = coordinator.deposit().await.unwrap();
        assert!(step.was_skipped());
        assert!(ledger.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_signed_by_treasury() {
        let (ledger, coordinator) = setup();
        let a = ledger.addresses();
        ledger.set_balance(a.target_vault, a.treasury, U256::from(70u64));

        coordinator.transfer_to_distributor().await.unwrap();

        let (signer, _, command) = ledger.submissions().remove(0);
        assert_eq!(signer, a.treasury);
        assert_eq!(
            command,
            LedgerCommand::Transfer {
                to: a.distributor,
                amount: U256::from(70u64)
            }
        );
        assert_eq!(ledger.balance_of(a.target_vault, a.distributor), U256::from(70u64));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let (ledger, coordinator) = setup();
        let a = ledger.addresses();
        ledger.set_balance(a.target_vault, a.registry, U256::from(10u64));
        ledger.fail_next("emergencyExit", LedgerError::rejected("emergencyExit", "paused"));

        let err = coordinator.emergency_exit().await.unwrap_err();
        assert!(matches!(err, MigrationError::Ledger(LedgerError::Rejected { .. })));
        assert!(ledger.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        let (ledger, coordinator) = setup();
        ledger.fail_next("setDepositLimit", LedgerError::transport("setDepositLimit", "connection reset"));

        coordinator.raise_limit().await.unwrap();
        assert_eq!(ledger.deposit_limit(), U256::MAX);
        assert_eq!(ledger.submitted(), vec!["setDepositLimit"]);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (ledger, coordinator) = setup();
        ledger.add_legacy_holder(holder(1), U256::from(10u64), true);
        for _ in 0..4 {
            ledger.fail_next("withdraw", LedgerError::transport("withdraw", "down"));
        }

        let err = coordinator.withdraw().await.unwrap_err();
        assert!(matches!(err, MigrationError::RetriesExhausted { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn test_retry_unresolved_noop_when_nothing_eligible() {
        let (ledger, coordinator) = setup();
        ledger.add_legacy_holder(holder(1), U256::from(10u64), false);

        let outcome = coordinator.retry_unresolved().await.unwrap();
        assert!(outcome.is_noop());
        assert_eq!(outcome.still_blocked, vec![holder(1)]);
        assert!(ledger.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_after_lost_receipt_is_not_resubmitted() {
        let (ledger, coordinator) = setup();
        let a = ledger.addresses();
        ledger.add_legacy_holder(holder(1), U256::from(10u64), true);
        ledger.timeout_after_apply("withdraw");

        let step = coordinator.withdraw().await.unwrap();

        assert!(step.was_skipped());
        assert_eq!(ledger.submitted(), vec!["withdraw"]);
        assert_eq!(ledger.balance_of(a.legacy_vault, a.registry), U256::from(10u64));
    }

    #[tokio::test]
    async fn test_withdraw_skipped_when_nobody_withdrawable() {
        let (ledger, coordinator) = setup();
        ledger.add_legacy_holder(holder(1), U256::from(10u64), false);

        let step = coordinator.withdraw().await.unwrap();
        assert!(step.was_skipped());
        assert!(ledger.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_emergency_exit_after_lost_receipt_is_not_resubmitted() {
        let (ledger, coordinator) = setup();
        let a = ledger.addresses();
        ledger.set_balance(a.target_vault, a.registry, U256::from(40u64));
        ledger.timeout_after_apply("emergencyExit");

        let step = coordinator.emergency_exit().await.unwrap();

        assert!(step.was_skipped());
        assert_eq!(ledger.submitted(), vec!["emergencyExit"]);
        assert_eq!(ledger.balance_of(a.target_vault, a.treasury), U256::from(40u64));
    }
}
