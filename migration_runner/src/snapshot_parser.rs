//! CSV snapshot parsing and serialization
//!
//! Snapshots are curated by hand, so a bad row never aborts the file: each
//! row yields either a `Recipient` or a `MalformedRowError` and the caller
//! decides what to do with the failures.

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim, WriterBuilder};
use std::io::{Read, Write};
use tracing::warn;

use crate::address::{parse_address, to_checksum};
use crate::amount::{format_amount, parse_amount};
use crate::error::{MalformedRowError, ParseError};
use crate::types::{ReconciliationRow, Recipient};

/// Header used by the final migration list and by `serialize`
pub const RECIPIENT_HEADER: [&str; 2] = ["receiver", "balance"];

/// Header used by the reconciliation report
pub const REPORT_HEADER: [&str; 5] = [
    "receiver",
    "v1Balance",
    "allowanceToMigration",
    "includedInMigration",
    "registeredBalanceInMigration",
];

/// Lazy iterator over snapshot rows.
pub struct SnapshotRows<R: Read> {
    records: StringRecordsIntoIter<R>,
    address_idx: usize,
    balance_idx: usize,
    decimals: u8,
}

impl<R: Read> SnapshotRows<R> {
    fn parse_record(&self, record: &StringRecord) -> Result<Recipient, MalformedRowError> {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let malformed = |reason: String| MalformedRowError { line, reason };

        let raw_address = record
            .get(self.address_idx)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("missing address".to_string()))?;
        let raw_balance = record
            .get(self.balance_idx)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("missing balance".to_string()))?;

        let address = parse_address(raw_address).map_err(|e| malformed(e.to_string()))?;
        let balance = parse_amount(raw_balance, self.decimals).map_err(|e| malformed(e.to_string()))?;

        Ok(Recipient::new(address, balance))
    }
}

impl<R: Read> Iterator for SnapshotRows<R> {
    type Item = Result<Recipient, MalformedRowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(match record {
            Ok(record) => self.parse_record(&record),
            Err(e) => Err(MalformedRowError {
                line: e.position().map(|p| p.line()).unwrap_or(0),
                reason: e.to_string(),
            }),
        })
    }
}

/// Start parsing a snapshot.
///
/// Only header problems fail here; row problems surface from the iterator.
pub fn parse<R: Read>(
    source: R,
    address_column: &str,
    balance_column: &str,
    balance_decimals: u8,
) -> Result<SnapshotRows<R>, ParseError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(source);

    let headers = reader.headers()?.clone();
    let find = |column: &str| {
        headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| ParseError::MissingColumn(column.to_string()))
    };
    let address_idx = find(address_column)?;
    let balance_idx = find(balance_column)?;

    Ok(SnapshotRows {
        records: reader.into_records(),
        address_idx,
        balance_idx,
        decimals: balance_decimals,
    })
}

/// Fully parsed snapshot with per-row failures kept alongside.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSnapshot {
    pub recipients: Vec<Recipient>,
    pub errors: Vec<MalformedRowError>,
}

impl ParsedSnapshot {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Drain a row iterator, logging each malformed row.
pub fn collect_rows<R: Read>(rows: SnapshotRows<R>) -> ParsedSnapshot {
    let mut parsed = ParsedSnapshot::default();
    for row in rows {
        match row {
            Ok(recipient) => parsed.recipients.push(recipient),
            Err(e) => {
                warn!(line = e.line, reason = %e.reason, "Skipping malformed snapshot row");
                parsed.errors.push(e);
            }
        }
    }
    parsed
}

/// Write recipients as `receiver,balance`. Inverse of [`parse`] with those
/// column names and the same `decimals`.
pub fn serialize<W: Write>(recipients: &[Recipient], sink: W, decimals: u8) -> Result<(), ParseError> {
    let mut writer = WriterBuilder::new().from_writer(sink);
    writer.write_record(RECIPIENT_HEADER)?;
    for recipient in recipients {
        writer.write_record([
            to_checksum(&recipient.address),
            format_amount(recipient.balance, decimals),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the reconciliation report with its fixed header.
pub fn serialize_report<W: Write>(rows: &[ReconciliationRow], sink: W, decimals: u8) -> Result<(), ParseError> {
    let mut writer = WriterBuilder::new().from_writer(sink);
    writer.write_record(REPORT_HEADER)?;
    for row in rows {
        writer.write_record([
            to_checksum(&row.receiver),
            format_amount(row.legacy_balance, decimals),
            format_amount(row.allowance_to_migration, decimals),
            row.included_in_registry.to_string(),
            format_amount(row.registered_balance, decimals),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[allow(dead_code)]
#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::{Address, U256};

    const HOLDER: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn test_parse_holder_header_with_separators() {
        let csv = format!("\"HolderAddress\",\"Balance\"\n\"{}\",\"1,234.56\"\n", HOLDER);
        let parsed = collect_rows(parse(csv.as_bytes(), "HolderAddress", "Balance", 6).unwrap());
        assert!(parsed.is_clean());
        assert_eq!(parsed.recipients.len(), 1);
        assert_eq!(parsed.recipients[0].balance, U256::from(1_234_560_000u64));
        assert_eq!(to_checksum(&parsed.recipients[0].address), HOLDER);
    }

    #[test]
    fn test_malformed_rows_are_collected_not_fatal() {
        let csv = format!(
            "receiver,balance\n{h},10\nnot-an-address,5\n{h}\n{h},-3\n{h},7\n",
            h = HOLDER
        );
        let parsed = collect_rows(parse(csv.as_bytes(), "receiver", "balance", 0).unwrap());
        assert_eq!(parsed.recipients.len(), 2);
        assert_eq!(parsed.errors.len(), 3);
        assert_eq!(parsed.errors[0].line, 3);
        assert!(parsed.errors[1].reason.contains("missing balance"));
    }

    #[test]
    fn test_missing_column_is_file_level() {
        let result = parse("address,amount\n".as_bytes(), "receiver", "balance", 18);
        assert!(matches!(result, Err(ParseError::MissingColumn(c)) if c == "receiver"));
    }

    #[test]
    fn test_parse_is_lazy() {
        let csv = format!("receiver,balance\n{h},1\n{h},2\n", h = HOLDER);
        let mut rows = parse(csv.as_bytes(), "receiver", "balance", 0).unwrap();
        assert_eq!(rows.next().unwrap().unwrap().balance, U256::one());
        assert_eq!(rows.next().unwrap().unwrap().balance, U256::from(2u64));
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_serialize_round_trip() {
        let recipients = vec![
            Recipient::new(Address::repeat_byte(0x11), U256::from(1_500_000u64)),
            Recipient::new(Address::repeat_byte(0xab), U256::from(7u64)),
            Recipient::new(Address::repeat_byte(0x02), U256::zero()),
        ];
        let mut out = Vec::new();
        serialize(&recipients, &mut out, 6).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("receiver,balance\n"));
        assert!(text.contains(",1.5\n"));

        let parsed = collect_rows(parse(out.as_slice(), "receiver", "balance", 6).unwrap());
        assert_eq!(parsed.recipients, recipients);
    }

    #[test]
    fn test_report_header() {
        let row = ReconciliationRow {
            receiver: Address::repeat_byte(0x22),
            legacy_balance: U256::from(100u64),
            allowance_to_migration: U256::MAX,
            included_in_registry: true,
            registered_balance: U256::from(100u64),
            discrepancies: Vec::new(),
        };
        let mut out = Vec::new();
        serialize_report(&[row], &mut out, 2).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "receiver,v1Balance,allowanceToMigration,includedInMigration,registeredBalanceInMigration"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with(&format!("{},1,", to_checksum(&Address::repeat_byte(0x22)))));
        assert!(row.ends_with(",true,1"));
    }
}
