//! Typed error taxonomy for the migration runner
//!
//! Ledger failures are split by whether retrying can help: a rejection is
//! final for the current transition, a timeout or transport failure only
//! means the outcome is unknown and live state must be re-read.

use ethereum_types::{Address, U256};
use std::time::Duration;
use thiserror::Error;

use crate::address::to_checksum;
use crate::config::ConfigError;

/// Failures surfaced by a `LedgerClient`.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Ledger rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },

    #[error("Timed out after {elapsed:?} waiting for {operation}")]
    Timeout { operation: String, elapsed: Duration },

    #[error("Transport failure during {operation}: {reason}")]
    Transport { operation: String, reason: String },

    #[error("Could not decode {operation} response: {reason}")]
    Decode { operation: String, reason: String },

    #[error("No signing key registered for {0}")]
    UnknownSigner(String),
}

impl LedgerError {
    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        LedgerError::Rejected {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(operation: impl Into<String>, reason: impl ToString) -> Self {
        LedgerError::Transport {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(operation: impl Into<String>, reason: impl ToString) -> Self {
        LedgerError::Decode {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Timeout { .. } | LedgerError::Transport { .. })
    }
}

/// A CSV row that could not be turned into a `Recipient`.
///
/// Collected per row; the rest of the file is still parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed row at line {line}: {reason}")]
pub struct MalformedRowError {
    pub line: u64,
    pub reason: String,
}

/// File-level CSV failures that stop parsing altogether.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Missing required column {0}")]
    MissingColumn(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error for every migration stage.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Insufficient funds: batch needs {required}, distributor holds {available}")]
    InsufficientFunds { required: U256, available: U256 },

    #[error("Shortfall: batch cost {estimated} exceeds headroom {headroom} with {remaining} recipients left")]
    Shortfall {
        estimated: U256,
        headroom: U256,
        remaining: usize,
    },

    #[error("Vault pointer mismatch: expected {}, found {}", to_checksum(.expected), to_checksum(.actual))]
    VaultPointerMismatch { expected: Address, actual: Address },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Retries exhausted for {operation} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: LedgerError,
    },
}

impl MigrationError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[allow(dead_code)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let timeout = LedgerError::Timeout {
            operation: "deposit".to_string(),
            elapsed: Duration::from_secs(30),
        };
        assert!(timeout.is_retryable());
        assert!(LedgerError::transport("withdraw", "connection reset").is_retryable());
        assert!(!LedgerError::rejected("inject", "already injected").is_retryable());
        assert!(MigrationError::from(timeout).is_retryable());
        assert!(!MigrationError::InvalidSnapshot("clock skew".to_string()).is_retryable());
    }

    #[test]
    fn test_mismatch_message_uses_checksum() {
        let err = MigrationError::VaultPointerMismatch {
            expected: Address::repeat_byte(0xaa),
            actual: Address::zero(),
        };
        let message = err.to_string();
        assert!(message.contains("0x0000000000000000000000000000000000000000"));
        assert!(message.contains("found"));
    }
}
