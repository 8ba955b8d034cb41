//! Injection seed computation for the target vault
//!
//! The legacy vault discounts recently realised profit linearly over time.
//! The target vault is seeded with the legacy total supply and with free
//! funds equal to total assets minus whatever profit is still locked at the
//! reference block.

use ethereum_types::{U256, U512};
use tracing::debug;

use crate::error::MigrationError;
use crate::types::{InjectionSeed, LedgerSnapshot};

/// Fixed-point base of the degradation rate (10^19).
pub fn degradation_unit() -> U256 {
    U256::exp10(19)
}

/// Profit still locked at `snapshot.block_timestamp`.
///
/// Precondition: `block_timestamp` is the timestamp of `as_of_block`, the
/// same block every other snapshot field was read at.
pub fn effective_locked_profit(snapshot: &LedgerSnapshot) -> Result<U256, MigrationError> {
    let elapsed = snapshot
        .block_timestamp
        .checked_sub(snapshot.last_report_timestamp)
        .ok_or_else(|| {
            MigrationError::InvalidSnapshot(format!(
                "block timestamp {} precedes last report {}",
                snapshot.block_timestamp, snapshot.last_report_timestamp
            ))
        })?;

    let unit = degradation_unit();
    let locked_ratio = match U256::from(elapsed).checked_mul(snapshot.locked_profit_degradation_rate) {
        Some(ratio) => ratio,
        // Overflow is far past the unit: fully decayed
        None => return Ok(U256::zero()),
    };

    if locked_ratio >= unit {
        return Ok(U256::zero());
    }

    let decayed = locked_ratio.full_mul(snapshot.locked_profit) / U512::from(unit);
    let decayed = U256::try_from(decayed)
        .map_err(|_| MigrationError::InvalidSnapshot("decayed profit exceeds uint256".to_string()))?;

    Ok(snapshot.locked_profit - decayed)
}

/// Derive the seed values from a point-in-time legacy snapshot.
pub fn compute_seed(snapshot: &LedgerSnapshot) -> Result<InjectionSeed, MigrationError> {
    let locked = effective_locked_profit(snapshot)?;
    let free_funds = snapshot.total_assets.checked_sub(locked).ok_or_else(|| {
        MigrationError::InvalidSnapshot(format!(
            "locked profit {} exceeds total assets {}",
            locked, snapshot.total_assets
        ))
    })?;

    debug!(
        block = snapshot.as_of_block,
        locked_profit = %snapshot.locked_profit,
        effective_locked_profit = %locked,
        free_funds = %free_funds,
        "Computed injection seed"
    );

    Ok(InjectionSeed {
        total_supply_to_inject: snapshot.total_supply,
        free_funds_to_inject: free_funds,
    })
}
