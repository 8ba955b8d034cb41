//! Exact fixed-point amount handling at the ledger's native precision
//!
//! Balances are carried as raw `U256` integers (`1.5` at 6 decimals is
//! `1_500_000`). Human-readable strings are converted digit by digit so
//! no floating point or intermediate rounding is ever involved.

use ethereum_types::U256;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Empty amount")]
    Empty,

    #[error("Negative amount {0}")]
    Negative(String),

    #[error("Invalid digits in amount {0}")]
    InvalidDigits(String),

    #[error("Amount {value} has more than {decimals} fractional digits")]
    TooPrecise { value: String, decimals: u8 },

    #[error("Amount {0} overflows uint256")]
    Overflow(String),
}

/// Parse a human-readable decimal string into raw units.
///
/// Thousands separators (`,`), underscores and surrounding whitespace are
/// stripped. Fractional digits beyond `decimals` are rejected unless they
/// are trailing zeros.
pub fn parse_amount(raw: &str, decimals: u8) -> Result<U256, AmountError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err(AmountError::Empty);
    }
    if cleaned.starts_with('-') {
        return Err(AmountError::Negative(raw.to_string()));
    }
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);

    let (whole, fraction) = match cleaned.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (cleaned, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(AmountError::InvalidDigits(raw.to_string()));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountError::InvalidDigits(raw.to_string()));
    }

    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > decimals as usize {
        return Err(AmountError::TooPrecise {
            value: raw.to_string(),
            decimals,
        });
    }

    let mut digits = String::with_capacity(whole.len() + decimals as usize);
    digits.push_str(whole);
    digits.push_str(fraction);
    for _ in fraction.len()..decimals as usize {
        digits.push('0');
    }

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::zero());
    }

    U256::from_dec_str(digits).map_err(|_| AmountError::Overflow(raw.to_string()))
}

/// Render raw units as a plain decimal string (no separators, trailing
/// fractional zeros trimmed). Inverse of [`parse_amount`].
pub fn format_amount(value: U256, decimals: u8) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }

    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
    } else {
        digits
    };

    let split = padded.len() - decimals;
    let (whole, fraction) = padded.split_at(split);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    }
}
