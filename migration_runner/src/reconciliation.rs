//! Cross-check of a curated CSV snapshot against live ledger state
//!
//! Pure reads: nothing here submits to the ledger. The output report holds
//! exactly one row per distinct address found in either the snapshot or
//! the registry, in snapshot order followed by registry-only members in
//! registry order.

use ethereum_types::{Address, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::address::to_checksum;
use crate::amount::format_amount;
use crate::error::{LedgerError, MigrationError};
use crate::ledger_client::LedgerClient;
use crate::registry_scan::collect_members;
use crate::types::{sum_balances, Discrepancy, ReconciliationRow, Recipient};

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationOutcome {
    /// Registered holders the next withdraw will pull in, payable in this wave
    pub validated: Vec<Recipient>,
    /// Unregistered holders and registered ones whose allowance does not
    /// cover their balance yet; carried to a follow-up wave
    pub pending: Vec<Recipient>,
    /// Registered holders the registry already withdrew; never paid again
    pub already_migrated: Vec<Recipient>,
    pub report: Vec<ReconciliationRow>,
}

impl ReconciliationOutcome {
    pub fn validated_total(&self) -> U256 {
        sum_balances(&self.validated)
    }

    pub fn pending_total(&self) -> U256 {
        sum_balances(&self.pending)
    }

    pub fn already_migrated_total(&self) -> U256 {
        sum_balances(&self.already_migrated)
    }

    /// Rows that carry at least one discrepancy
    pub fn mismatches(&self) -> impl Iterator<Item = &ReconciliationRow> {
        self.report.iter().filter(|row| !row.discrepancies.is_empty())
    }
}

/// A holder to look up, with its snapshot balance if it came from the CSV
#[derive(Debug)]
struct Candidate {
    address: Address,
    snapshot_balance: Option<U256>,
    ignored_duplicates: Vec<U256>,
}

#[derive(Debug)]
struct LiveReading {
    legacy_balance: U256,
    allowance: U256,
    registered_balance: U256,
    withdrawn: bool,
}

/// Where a reconciled holder lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Validated,
    Pending,
    AlreadyMigrated,
}

pub struct ReconciliationEngine {
    client: Arc<dyn LedgerClient>,
    legacy_vault: Address,
    registry: Address,
    max_users: u64,
    read_concurrency: usize,
    decimals: u8,
}

impl ReconciliationEngine {
    pub fn new(client: Arc<dyn LedgerClient>, legacy_vault: Address, registry: Address) -> Self {
        Self {
            client,
            legacy_vault,
            registry,
            max_users: 1000,
            read_concurrency: 16,
            decimals: 18,
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

    /// Precision used when rendering amounts in logs
    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    /// Reconcile snapshot rows against the registry and live balances.
    ///
    /// Registry membership is re-derived on every call; nothing is cached
    /// between passes.
    pub async fn reconcile(&self, snapshot_rows: &[Recipient]) -> Result<ReconciliationOutcome, MigrationError> {
        let members = collect_members(Arc::clone(&self.client), self.registry, self.max_users).await?;
        let member_set: HashSet<Address> = members.iter().copied().collect();

        let candidates = Self::candidates(snapshot_rows, &members);

        let readings: Vec<LiveReading> = stream::iter(candidates.iter().map(|c| self.read_live(c.address)))
            .buffered(self.read_concurrency)
            .try_collect()
            .await?;

        let mut outcome = ReconciliationOutcome::default();
        for (candidate, reading) in candidates.into_iter().zip(readings) {
            let included = member_set.contains(&candidate.address);
            let class = Self::classify(&reading, included);
            let row = Self::build_row(
                candidate.address,
                candidate.snapshot_balance,
                &candidate.ignored_duplicates,
                reading,
                included,
                class,
            );

            if !row.discrepancies.is_empty() {
                warn!(
                    receiver = %to_checksum(&row.receiver),
                    discrepancies = ?row.discrepancies,
                    "Reconciliation mismatch"
                );
            }

            match class {
                Class::Validated => outcome.validated.push(Recipient::new(row.receiver, row.resolved_balance())),
                Class::AlreadyMigrated => {
                    outcome.already_migrated.push(Recipient::new(row.receiver, row.resolved_balance()))
                }
                Class::Pending if included => outcome.pending.push(Recipient::new(row.receiver, row.resolved_balance())),
                Class::Pending => {
                    let carried = candidate.snapshot_balance.unwrap_or(row.legacy_balance);
                    outcome.pending.push(Recipient::new(row.receiver, carried));
                }
            }
            outcome.report.push(row);
        }

        info!(
            snapshot_rows = snapshot_rows.len(),
            registry_members = members.len(),
            validated = outcome.validated.len(),
            validated_total = %format_amount(outcome.validated_total(), self.decimals),
            pending = outcome.pending.len(),
            pending_total = %format_amount(outcome.pending_total(), self.decimals),
            already_migrated = outcome.already_migrated.len(),
            mismatches = outcome.mismatches().count(),
            "Reconciliation complete"
        );

        Ok(outcome)
    }

    /// Snapshot holders (first occurrence wins) followed by registry-only members.
    fn candidates(snapshot_rows: &[Recipient], members: &[Address]) -> Vec<Candidate> {
        let mut index: HashMap<Address, usize> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::with_capacity(snapshot_rows.len() + members.len());

        for row in snapshot_rows {
            match index.get(&row.address) {
                Some(&i) => candidates[i].ignored_duplicates.push(row.balance),
                None => {
                    index.insert(row.address, candidates.len());
                    candidates.push(Candidate {
                        address: row.address,
                        snapshot_balance: Some(row.balance),
                        ignored_duplicates: Vec::new(),
                    });
                }
            }
        }

        for member in members {
            if !index.contains_key(member) {
                index.insert(*member, candidates.len());
                candidates.push(Candidate {
                    address: *member,
                    snapshot_balance: None,
                    ignored_duplicates: Vec::new(),
                });
            }
        }

        candidates
    }

    async fn read_live(&self, holder: Address) -> Result<LiveReading, LedgerError> {
        let (legacy_balance, allowance, registered_balance, withdrawn) = futures::try_join!(
            self.client.read_balance(self.legacy_vault, holder),
            self.client.read_allowance(self.legacy_vault, holder, self.registry),
            self.client.read_registered_balance(self.registry, holder),
            self.client.read_withdrawn(self.registry, holder),
        )?;

        Ok(LiveReading {
            legacy_balance,
            allowance,
            registered_balance,
            withdrawn,
        })
    }

    /// Validated only when the registry's next withdraw will actually move
    /// the holder's balance: registered, not yet withdrawn, funded and approved.
    fn classify(reading: &LiveReading, included: bool) -> Class {
        if !included {
            return Class::Pending;
        }
        if reading.withdrawn {
            return Class::AlreadyMigrated;
        }
        if reading.legacy_balance.is_zero() || reading.allowance < reading.legacy_balance {
            return Class::Pending;
        }
        Class::Validated
    }

    fn build_row(
        receiver: Address,
        snapshot_balance: Option<U256>,
        ignored_duplicates: &[U256],
        reading: LiveReading,
        included: bool,
        class: Class,
    ) -> ReconciliationRow {
        let mut row = ReconciliationRow {
            receiver,
            legacy_balance: reading.legacy_balance,
            allowance_to_migration: reading.allowance,
            included_in_registry: included,
            registered_balance: if included { reading.registered_balance } else { U256::zero() },
            discrepancies: Vec::new(),
        };

        match snapshot_balance {
            None => row.discrepancies.push(Discrepancy::NotInSnapshot),
            Some(snapshot) => {
                if !included {
                    row.discrepancies.push(Discrepancy::NotRegistered);
                }
                let live = row.resolved_balance();
                if snapshot != live {
                    row.discrepancies.push(Discrepancy::BalanceMismatch { snapshot, live });
                }
            }
        }

        for ignored in ignored_duplicates {
            row.discrepancies.push(Discrepancy::DuplicateSnapshotRow {
                ignored_balance: *ignored,
            });
        }

        if class == Class::AlreadyMigrated {
            row.discrepancies.push(Discrepancy::AlreadyMigrated);
        } else if included && !row.legacy_balance.is_zero() && row.allowance_to_migration < row.legacy_balance {
            row.discrepancies.push(Discrepancy::AllowanceShortfall {
                required: row.legacy_balance,
                granted: row.allowance_to_migration,
            });
        }

        row
    }
}
