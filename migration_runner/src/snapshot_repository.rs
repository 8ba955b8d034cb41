//! Storage port for snapshots, reports and recipient lists

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ParseError;
use crate::snapshot_parser::{self, ParsedSnapshot, RECIPIENT_HEADER};
use crate::types::{ReconciliationRow, Recipient};

/// Where wave inputs come from and where results go.
pub trait SnapshotRepository: Send + Sync {
    /// Curated holder snapshot with its own column names
    fn load_snapshot(&self, address_column: &str, balance_column: &str, decimals: u8) -> Result<ParsedSnapshot, ParseError>;

    fn store_report(&self, rows: &[ReconciliationRow], decimals: u8) -> Result<(), ParseError>;

    fn store_recipients(&self, recipients: &[Recipient], decimals: u8) -> Result<(), ParseError>;

    /// Final migration list written by `store_recipients`
    fn load_recipients(&self, decimals: u8) -> Result<ParsedSnapshot, ParseError>;
}

/// CSV files under one data directory
#[derive(Debug, Clone)]
pub struct CsvSnapshotRepository {
    data_dir: PathBuf,
    snapshot_file: String,
    report_file: String,
    recipients_file: String,
}

impl CsvSnapshotRepository {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            snapshot_file: "snapshot.csv".to_string(),
            report_file: "reconciliation_report.csv".to_string(),
            recipients_file: "final_migration_list.csv".to_string(),
        }
    }

    pub fn with_files(
        mut self,
        snapshot_file: impl Into<String>,
        report_file: impl Into<String>,
        recipients_file: impl Into<String>,
    ) -> Self {
        self.snapshot_file = snapshot_file.into();
        self.report_file = report_file.into();
        self.recipients_file = recipients_file.into();
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    fn create(&self, file: &str) -> Result<BufWriter<File>, ParseError> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(BufWriter::new(File::create(self.path(file))?))
    }

    fn load(&self, file: &str, address_column: &str, balance_column: &str, decimals: u8) -> Result<ParsedSnapshot, ParseError> {
        let path = self.path(file);
        let rows = snapshot_parser::parse(File::open(&path)?, address_column, balance_column, decimals)?;
        let parsed = snapshot_parser::collect_rows(rows);
        info!(
            path = %path.display(),
            rows = parsed.recipients.len(),
            malformed = parsed.errors.len(),
            "Loaded CSV"
        );
        Ok(parsed)
    }
}

impl SnapshotRepository for CsvSnapshotRepository {
    fn load_snapshot(&self, address_column: &str, balance_column: &str, decimals: u8) -> Result<ParsedSnapshot, ParseError> {
        self.load(&self.snapshot_file, address_column, balance_column, decimals)
    }

    fn store_report(&self, rows: &[ReconciliationRow], decimals: u8) -> Result<(), ParseError> {
        snapshot_parser::serialize_report(rows, self.create(&self.report_file)?, decimals)?;
        info!(path = %self.path(&self.report_file).display(), rows = rows.len(), "Wrote reconciliation report");
        Ok(())
    }

    fn store_recipients(&self, recipients: &[Recipient], decimals: u8) -> Result<(), ParseError> {
        snapshot_parser::serialize(recipients, self.create(&self.recipients_file)?, decimals)?;
        info!(
            path = %self.path(&self.recipients_file).display(),
            rows = recipients.len(),
            "Wrote final migration list"
        );
        Ok(())
    }

    fn load_recipients(&self, decimals: u8) -> Result<ParsedSnapshot, ParseError> {
        let [address_column, balance_column] = RECIPIENT_HEADER;
        self.load(&self.recipients_file, address_column, balance_column, decimals)
    }
}

#[allow(dead_code)]
#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::{Address, U256};
    use tempfile::TempDir;

    #[test]
    fn test_recipients_round_trip_through_files() {
        let dir = TempDir::new().unwrap();
        let repo = CsvSnapshotRepository::new(dir.path().join("wave-1"));
        let recipients = vec![
            Recipient::new(Address::repeat_byte(0x31), U256::from(12_345u64)),
            Recipient::new(Address::repeat_byte(0x32), U256::exp10(18)),
        ];

        repo.store_recipients(&recipients, 18).unwrap();
        let loaded = repo.load_recipients(18).unwrap();

        assert!(loaded.is_clean());
        assert_eq!(loaded.recipients, recipients);
    }

    #[test]
    fn test_load_snapshot_with_custom_columns() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("holders.csv"),
            "\"HolderAddress\",\"Balance\"\n\"0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed\",\"2,500\"\nbad,1\n",
        )
        .unwrap();
        let repo = CsvSnapshotRepository::new(dir.path()).with_files("holders.csv", "report.csv", "final.csv");

        let parsed = repo.load_snapshot("HolderAddress", "Balance", 0).unwrap();
        assert_eq!(parsed.recipients.len(), 1);
        assert_eq!(parsed.recipients[0].balance, U256::from(2_500u64));
        assert_eq!(parsed.errors.len(), 1);
    }

    #[test]
    fn test_missing_snapshot_is_io_error() {
        let dir = TempDir::new().unwrap();
        let repo = CsvSnapshotRepository::new(dir.path());
        assert!(matches!(repo.load_snapshot("receiver", "balance", 18), Err(ParseError::Io(_))));
    }

    #[test]
    fn test_report_written() {
        let dir = TempDir::new().unwrap();
        let repo = CsvSnapshotRepository::new(dir.path());
        let row = ReconciliationRow {
            receiver: Address::repeat_byte(0x44),
            legacy_balance: U256::from(5u64),
            allowance_to_migration: U256::zero(),
            included_in_registry: false,
            registered_balance: U256::zero(),
            discrepancies: Vec::new(),
        };
        repo.store_report(&[row], 0).unwrap();

        let text = fs::read_to_string(dir.path().join("reconciliation_report.csv")).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().ends_with(",5,0,false,0"));
    }
}
