//! Vault Migration Library
//!
//! Legacy vault to share-vault migration: injection seed computation,
//! snapshot reconciliation, the wave state machine and batch distribution.

pub mod address;
pub mod amount;
pub mod config;
pub mod coordinator;
pub mod distributor;
pub mod error;
pub mod injection;
pub mod ledger_client;
pub mod mock_ledger;
pub mod reconciliation;
pub mod registry_scan;
pub mod snapshot_parser;
pub mod snapshot_repository;
pub mod tracing_logger;
pub mod types;
pub mod web3_ledger;

pub use config::MigrationConfig;
pub use coordinator::{MigrationCoordinator, WaveReport};
pub use distributor::{BatchDistributor, DistributionOutcome};
pub use error::{LedgerError, MigrationError};
pub use ledger_client::{ActingAs, LedgerClient, LedgerCommand, ScopedClient};
pub use reconciliation::{ReconciliationEngine, ReconciliationOutcome};
pub use snapshot_repository::{CsvSnapshotRepository, SnapshotRepository};
pub use types::{InjectionSeed, LedgerSnapshot, Recipient, WaveState};
