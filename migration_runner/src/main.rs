//! Vault Migration Runner
//!
//! Env-driven operator binary: `vault-migration <command>`

use anyhow::{anyhow, bail, Context, Result};
use ethereum_types::U256;
use std::{env, path::PathBuf, sync::Arc};
use tracing::{info, warn, Instrument};

use vault_migration::{
    address::to_checksum,
    amount::format_amount,
    config::{self, MigrationConfig},
    coordinator::MigrationCoordinator,
    injection::compute_seed,
    ledger_client::LedgerClient,
    reconciliation::{ReconciliationEngine, ReconciliationOutcome},
    snapshot_repository::{CsvSnapshotRepository, SnapshotRepository},
    tracing_logger::{self, WaveLogger},
    web3_ledger::{Keyring, Web3LedgerClient},
};

const USAGE: &str = "usage: vault-migration <seed|reconcile|migrate|retry-unresolved|distribute|env-example>";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_logger::init_subscriber().map_err(|e| anyhow!("failed to initialise tracing: {}", e))?;

    // Load environment variables
    dotenv::dotenv().ok();

    let command = env::args().nth(1).ok_or_else(|| anyhow!(USAGE))?;
    if command == "env-example" {
        println!("{}", config::create_env_example());
        return Ok(());
    }

    let config = load_config()?;
    info!(
        command = %command,
        legacy_vault = %to_checksum(&config.contracts.legacy_vault),
        target_vault = %to_checksum(&config.contracts.target_vault),
        reference_block = config.wave.reference_block,
        "Configuration loaded"
    );

    let client: Arc<dyn LedgerClient> = Arc::new(build_client(&config)?);
    let repository = CsvSnapshotRepository::new(config.files.data_dir.clone()).with_files(
        config.files.snapshot_file.clone(),
        config.files.report_file.clone(),
        config.files.recipients_file.clone(),
    );

    match command.as_str() {
        "seed" => seed(&config, client).await,
        "reconcile" => {
            reconcile(&config, client, &repository).await?;
            Ok(())
        }
        "migrate" => migrate(&config, client, &repository).await,
        "retry-unresolved" => retry_unresolved(&config, client).await,
        "distribute" => distribute(&config, client, &repository).await,
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
}

/// `MIGRATION_CONFIG` points at a TOML file; otherwise the environment is used
fn load_config() -> Result<MigrationConfig> {
    let config = match env::var("MIGRATION_CONFIG") {
        Ok(path) => MigrationConfig::from_file(&PathBuf::from(path))?,
        Err(_) => MigrationConfig::from_env()?,
    };
    Ok(config)
}

fn build_client(config: &MigrationConfig) -> Result<Web3LedgerClient> {
    let mut keyring = Keyring::new();
    for (var, expected) in [
        ("OPERATOR_PRIVATE_KEY", config.contracts.operator),
        ("TREASURY_PRIVATE_KEY", config.contracts.treasury),
    ] {
        match env::var(var) {
            Ok(key) if !key.trim().is_empty() => {
                let address = keyring.add_hex(&key).with_context(|| format!("loading {}", var))?;
                if address != expected {
                    bail!(
                        "{} controls {}, configuration expects {}",
                        var,
                        to_checksum(&address),
                        to_checksum(&expected)
                    );
                }
            }
            _ => warn!(var, "No signing key configured; submits for this identity will fail"),
        }
    }

    Ok(Web3LedgerClient::new(
        &config.ledger.rpc_url,
        config.contracts.clone(),
        keyring,
        config.ledger.receipt_timeout,
        config.ledger.confirmations,
    )?)
}

fn build_coordinator(config: &MigrationConfig, client: Arc<dyn LedgerClient>) -> MigrationCoordinator {
    MigrationCoordinator::new(
        client,
        config.contracts.clone(),
        config.wave.reference_block,
        U256::from(config.wave.max_batch_cost),
    )
    .with_max_users(config.wave.max_users)
    .with_read_concurrency(config.ledger.read_concurrency)
    .with_decimals(config.wave.decimals)
    .with_allow_repoint(config.wave.allow_repoint)
    .with_retry(config.retry.clone())
}

async fn seed(config: &MigrationConfig, client: Arc<dyn LedgerClient>) -> Result<()> {
    let snapshot = client
        .read_snapshot(config.contracts.legacy_vault, config.wave.reference_block)
        .await?;
    let seed = compute_seed(&snapshot)?;
    let injected = client.read_injected_once(config.contracts.target_vault).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "snapshot": snapshot,
            "seed": seed,
            "already_injected": injected,
        }))?
    );
    Ok(())
}

async fn reconcile(
    config: &MigrationConfig,
    client: Arc<dyn LedgerClient>,
    repository: &dyn SnapshotRepository,
) -> Result<ReconciliationOutcome> {
    let decimals = config.wave.decimals;
    let snapshot = repository.load_snapshot(&config.files.address_column, &config.files.balance_column, decimals)?;
    if !snapshot.is_clean() {
        warn!(malformed = snapshot.errors.len(), "Snapshot has malformed rows; continuing with valid rows");
    }

    let engine = ReconciliationEngine::new(client, config.contracts.legacy_vault, config.contracts.registry)
        .with_max_users(config.wave.max_users)
        .with_read_concurrency(config.ledger.read_concurrency)
        .with_decimals(decimals);
    let outcome = engine.reconcile(&snapshot.recipients).await?;

    repository.store_report(&outcome.report, decimals)?;
    repository.store_recipients(&outcome.validated, decimals)?;

    info!(
        validated = outcome.validated.len(),
        validated_total = %format_amount(outcome.validated_total(), decimals),
        pending = outcome.pending.len(),
        pending_total = %format_amount(outcome.pending_total(), decimals),
        already_migrated = outcome.already_migrated.len(),
        malformed = snapshot.errors.len(),
        "Reconciliation stored"
    );
    Ok(outcome)
}

async fn migrate(config: &MigrationConfig, client: Arc<dyn LedgerClient>, repository: &dyn SnapshotRepository) -> Result<()> {
    let outcome = reconcile(config, Arc::clone(&client), repository).await?;
    let report = build_coordinator(config, client).run_wave(&outcome.validated).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn retry_unresolved(config: &MigrationConfig, client: Arc<dyn LedgerClient>) -> Result<()> {
    let logger = WaveLogger::new("retry-unresolved");
    let coordinator = build_coordinator(config, client);
    let outcome = logger
        .log_operation("retry_unresolved", coordinator.retry_unresolved())
        .instrument(logger.span().clone())
        .await;
    logger.log_summary().await;

    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}

async fn distribute(config: &MigrationConfig, client: Arc<dyn LedgerClient>, repository: &dyn SnapshotRepository) -> Result<()> {
    let recipients = repository.load_recipients(config.wave.decimals)?;
    if !recipients.is_clean() {
        bail!(
            "final migration list has {} malformed rows; fix it before distributing",
            recipients.errors.len()
        );
    }

    let logger = WaveLogger::new("distribute");
    let coordinator = build_coordinator(config, client);
    let outcome = logger
        .log_operation("distribute", coordinator.distribute(&recipients.recipients))
        .instrument(logger.span().clone())
        .await;
    logger.log_summary().await;

    let outcome = outcome?;
    for dropped in &outcome.dropped {
        warn!(
            receiver = %to_checksum(&dropped.address),
            balance = %format_amount(dropped.balance, config.wave.decimals),
            "Not paid in this batch"
        );
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
