//! Address utilities: tolerant parsing and EIP-55 checksum rendering

use ethereum_types::Address;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Invalid address length for {0}")]
    InvalidLength(String),

    #[error("Invalid hex in address {0}")]
    InvalidHex(String),

    #[error("Checksum mismatch for {0}")]
    BadChecksum(String),
}

/// Parse an address string into a canonical `Address`.
///
/// Accepts an optional `0x` prefix and surrounding whitespace. All-lowercase
/// and all-uppercase input is accepted as is; mixed-case input must carry a
/// valid EIP-55 checksum, which catches hand-edited typos in curated CSVs.
pub fn parse_address(raw: &str) -> Result<Address, AddressError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if body.len() != 40 {
        return Err(AddressError::InvalidLength(raw.to_string()));
    }

    let bytes = hex::decode(body).map_err(|_| AddressError::InvalidHex(raw.to_string()))?;
    let address = Address::from_slice(&bytes);

    let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && &to_checksum(&address)[2..] != body {
        return Err(AddressError::BadChecksum(raw.to_string()));
    }

    Ok(address)
}

/// Render an address in EIP-55 mixed-case checksum form.
pub fn to_checksum(address: &Address) -> String {
    let lower = hex::encode(address.as_bytes());
    let hash = keccak_hash::keccak(lower.as_bytes());
    let hash = hash.as_bytes();

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 { hash[i / 2] >> 4 } else { hash[i / 2] & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
