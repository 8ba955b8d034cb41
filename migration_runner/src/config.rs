//! Runner configuration with validation
//!
//! Loaded from environment variables (optionally seeded from a `.env`
//! file) or from a TOML file. Signing keys never live in the TOML file;
//! they are only read from the environment by the binary.

use ethereum_types::Address;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::{Path, PathBuf}, time::Duration};

use crate::address::parse_address;

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Ledger connection settings
    pub ledger: LedgerConfig,

    /// Contract and identity addresses
    pub contracts: ContractsConfig,

    /// Per-wave parameters
    pub wave: WaveConfig,

    /// Retry policy for timed-out transitions
    pub retry: RetryConfig,

    /// CSV locations and schema
    pub files: FilesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub rpc_url: String,
    #[serde(with = "humantime_serde")]
    pub receipt_timeout: Duration,
    pub confirmations: usize,
    pub read_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub legacy_vault: Address,
    pub target_vault: Address,
    pub registry: Address,
    pub distributor: Address,
    pub treasury: Address,
    pub operator: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveConfig {
    /// Block used for every deterministic snapshot read
    pub reference_block: u64,
    /// Ceiling for the registry scan
    pub max_users: u64,
    /// Native precision of vault balances
    pub decimals: u8,
    /// Gas-equivalent headroom for a single drop submission
    pub max_batch_cost: u64,
    /// Replace a distributor vault pointer already set to another vault
    #[serde(default)]
    pub allow_repoint: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    pub data_dir: PathBuf,
    pub snapshot_file: String,
    pub address_column: String,
    pub balance_column: String,
    pub report_file: String,
    pub recipients_file: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            snapshot_file: "snapshot.csv".to_string(),
            address_column: "HolderAddress".to_string(),
            balance_column: "Balance".to_string(),
            report_file: "reconciliation_report.csv".to_string(),
            recipients_file: "final_migration_list.csv".to_string(),
        }
    }
}

impl MigrationConfig {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let retry_defaults = RetryConfig::default();
        let file_defaults = FilesConfig::default();

        let config = MigrationConfig {
            ledger: LedgerConfig {
                rpc_url: env::var("RPC_URL").unwrap_or_else(|_| "http://localhost:8545".to_string()),
                receipt_timeout: Duration::from_secs(parse_env("RECEIPT_TIMEOUT_SECS", 180)?),
                confirmations: parse_env("CONFIRMATIONS", 1)?,
                read_concurrency: parse_env("READ_CONCURRENCY", 16)?,
            },

            contracts: ContractsConfig {
                legacy_vault: address_env("LEGACY_VAULT")?,
                target_vault: address_env("TARGET_VAULT")?,
                registry: address_env("MIGRATION_REGISTRY")?,
                distributor: address_env("DISTRIBUTOR")?,
                treasury: address_env("TREASURY")?,
                operator: address_env("OPERATOR")?,
            },

            wave: WaveConfig {
                reference_block: env::var("REFERENCE_BLOCK")
                    .map_err(|_| ConfigError::MissingRequired("REFERENCE_BLOCK".to_string()))?
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("REFERENCE_BLOCK".to_string()))?,
                max_users: parse_env("MAX_USERS", 1000)?,
                decimals: parse_env("DECIMALS", 18)?,
                max_batch_cost: parse_env("MAX_BATCH_COST", 25_000_000)?,
                allow_repoint: parse_env("ALLOW_REPOINT", false)?,
            },

            retry: RetryConfig {
                max_retries: parse_env("RETRY_MAX_RETRIES", retry_defaults.max_retries)?,
                initial_interval: Duration::from_millis(parse_env(
                    "RETRY_INITIAL_INTERVAL_MS",
                    retry_defaults.initial_interval.as_millis() as u64,
                )?),
                max_interval: Duration::from_millis(parse_env(
                    "RETRY_MAX_INTERVAL_MS",
                    retry_defaults.max_interval.as_millis() as u64,
                )?),
                multiplier: parse_env("RETRY_MULTIPLIER", retry_defaults.multiplier)?,
            },

            files: FilesConfig {
                data_dir: env::var("DATA_DIR").map(PathBuf::from).unwrap_or(file_defaults.data_dir),
                snapshot_file: env::var("SNAPSHOT_FILE").unwrap_or(file_defaults.snapshot_file),
                address_column: env::var("ADDRESS_COLUMN").unwrap_or(file_defaults.address_column),
                balance_column: env::var("BALANCE_COLUMN").unwrap_or(file_defaults.balance_column),
                report_file: env::var("REPORT_FILE").unwrap_or(file_defaults.report_file),
                recipients_file: env::var("RECIPIENTS_FILE").unwrap_or(file_defaults.recipients_file),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MigrationConfig =
            toml::from_str(content).map_err(|e| ConfigError::FileError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.rpc_url.is_empty() {
            return Err(ConfigError::MissingRequired("rpc_url".to_string()));
        }

        if self.ledger.read_concurrency == 0 {
            return Err(ConfigError::InvalidConfig("read_concurrency must be greater than 0".to_string()));
        }

        let contracts = [
            ("legacy_vault", self.contracts.legacy_vault),
            ("target_vault", self.contracts.target_vault),
            ("registry", self.contracts.registry),
            ("distributor", self.contracts.distributor),
            ("treasury", self.contracts.treasury),
            ("operator", self.contracts.operator),
        ];
        for (name, address) in contracts {
            if address.is_zero() {
                return Err(ConfigError::InvalidConfig(format!("{} must not be the zero address", name)));
            }
        }

        if self.contracts.legacy_vault == self.contracts.target_vault {
            return Err(ConfigError::InvalidConfig(
                "legacy_vault and target_vault must differ".to_string(),
            ));
        }

        if self.wave.max_users == 0 {
            return Err(ConfigError::InvalidConfig("max_users must be greater than 0".to_string()));
        }

        if self.wave.decimals > 77 {
            return Err(ConfigError::InvalidConfig("decimals must fit in uint256".to_string()));
        }

        if self.wave.max_batch_cost == 0 {
            return Err(ConfigError::InvalidConfig("max_batch_cost must be greater than 0".to_string()));
        }

        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig("retry multiplier must be >= 1.0".to_string()));
        }

        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.files.data_dir.join(&self.files.snapshot_file)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

fn address_env(key: &str) -> Result<Address, ConfigError> {
    let raw = env::var(key).map_err(|_| ConfigError::MissingRequired(key.to_string()))?;
    parse_address(&raw).map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration file error: {0}")]
    FileError(String),
}

/// Create example .env file
pub fn create_env_example() -> String {
    r#"# Ledger Connection
RPC_URL=http://localhost:8545
RECEIPT_TIMEOUT_SECS=180
CONFIRMATIONS=1
READ_CONCURRENCY=16

# Contracts and identities
LEGACY_VAULT=0x0000000000000000000000000000000000000001
TARGET_VAULT=0x0000000000000000000000000000000000000002
MIGRATION_REGISTRY=0x0000000000000000000000000000000000000003
DISTRIBUTOR=0x0000000000000000000000000000000000000004
TREASURY=0x0000000000000000000000000000000000000005
OPERATOR=0x0000000000000000000000000000000000000006
OPERATOR_PRIVATE_KEY=
TREASURY_PRIVATE_KEY=

# Wave
REFERENCE_BLOCK=0
MAX_USERS=1000
DECIMALS=18
MAX_BATCH_COST=25000000
ALLOW_REPOINT=false

# Retry
RETRY_MAX_RETRIES=3
RETRY_INITIAL_INTERVAL_MS=2000
RETRY_MAX_INTERVAL_MS=60000
RETRY_MULTIPLIER=2.0

# Files
DATA_DIR=data
SNAPSHOT_FILE=snapshot.csv
ADDRESS_COLUMN=HolderAddress
BALANCE_COLUMN=Balance
REPORT_FILE=reconciliation_report.csv
RECIPIENTS_FILE=final_migration_list.csv
"#
    .to_string()
}

#[allow(dead_code)]
#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[ledger]
rpc_url = "http://localhost:8545"
receipt_timeout = "3m"
confirmations = 2
read_concurrency = 8

[contracts]
legacy_vault = "0x0000000000000000000000000000000000000001"
target_vault = "0x0000000000000000000000000000000000000002"
registry = "0x0000000000000000000000000000000000000003"
distributor = "0x0000000000000000000000000000000000000004"
treasury = "0x0000000000000000000000000000000000000005"
operator = "0x0000000000000000000000000000000000000006"

[wave]
reference_block = 17000000
max_users = 1000
decimals = 18
max_batch_cost = 25000000

[retry]
max_retries = 5
initial_interval = "500ms"
max_interval = "30s"
multiplier = 1.5

[files]
data_dir = "data"
snapshot_file = "snapshot.csv"
address_column = "receiver"
balance_column = "balance"
report_file = "report.csv"
recipients_file = "final.csv"
"#;

    #[test]
    fn test_toml_config_loads() {
        let config = MigrationConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.ledger.receipt_timeout, Duration::from_secs(180));
        assert_eq!(config.retry.initial_interval, Duration::from_millis(500));
        assert_eq!(config.wave.reference_block, 17_000_000);
        assert!(!config.wave.allow_repoint);
        assert_eq!(config.contracts.registry, Address::from_low_u64_be(3));
        assert_eq!(config.snapshot_path(), PathBuf::from("data").join("snapshot.csv"));
    }

    #[test]
    fn test_validation_rejects_zero_address() {
        let broken = SAMPLE.replace(
            "operator = \"0x0000000000000000000000000000000000000006\"",
            "operator = \"0x0000000000000000000000000000000000000000\"",
        );
        assert!(matches!(
            MigrationConfig::from_toml_str(&broken),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation_rejects_same_vaults() {
        let broken = SAMPLE.replace(
            "target_vault = \"0x0000000000000000000000000000000000000002\"",
            "target_vault = \"0x0000000000000000000000000000000000000001\"",
        );
        assert!(MigrationConfig::from_toml_str(&broken).is_err());
    }

    #[test]
    fn test_env_example_mentions_every_contract() {
        let example = create_env_example();
        for key in ["LEGACY_VAULT", "TARGET_VAULT", "MIGRATION_REGISTRY", "DISTRIBUTOR", "TREASURY", "OPERATOR"] {
            assert!(example.contains(key));
        }
    }
}
