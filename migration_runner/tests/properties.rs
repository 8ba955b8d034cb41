//! Property tests for seed arithmetic and CSV round-trips

use ethereum_types::{Address, U256};
use proptest::prelude::*;

use vault_migration::{
    injection::{compute_seed, degradation_unit, effective_locked_profit},
    snapshot_parser::{collect_rows, parse, serialize},
    LedgerSnapshot, Recipient,
};

fn snapshot(elapsed: u64, rate: u128, locked: u128, extra_assets: u128, supply: u128) -> LedgerSnapshot {
    LedgerSnapshot {
        as_of_block: 1,
        block_timestamp: 1_600_000_000 + elapsed,
        last_report_timestamp: 1_600_000_000,
        locked_profit: U256::from(locked),
        locked_profit_degradation_rate: U256::from(rate),
        total_assets: U256::from(locked) + U256::from(extra_assets),
        total_supply: U256::from(supply),
    }
}

proptest! {
    #[test]
    fn test_free_funds_bounded_by_total_assets(
        elapsed in 0u64..10_000_000,
        rate in any::<u128>(),
        locked in any::<u128>(),
        extra in any::<u128>(),
        supply in any::<u128>(),
    ) {
        let s = snapshot(elapsed, rate, locked, extra, supply);
        let seed = compute_seed(&s).unwrap();

        prop_assert!(seed.free_funds_to_inject <= s.total_assets);
        prop_assert!(seed.free_funds_to_inject >= s.total_assets - s.locked_profit);
        prop_assert_eq!(seed.total_supply_to_inject, s.total_supply);
    }

    #[test]
    fn test_locked_profit_never_grows_with_time(
        a in 0u64..5_000_000,
        b in 0u64..5_000_000,
        rate in 0u128..10_000_000_000_000_000,
        locked in any::<u128>(),
    ) {
        let (earlier, later) = if a <= b { (a, b) } else { (b, a) };
        let first = effective_locked_profit(&snapshot(earlier, rate, locked, 0, 1)).unwrap();
        let second = effective_locked_profit(&snapshot(later, rate, locked, 0, 1)).unwrap();

        prop_assert!(second <= first);
        prop_assert!(first <= U256::from(locked));
    }

    #[test]
    fn test_fully_decayed_past_unit(rate in 1u128..1_000_000, locked in any::<u128>()) {
        // elapsed * rate >= unit
        let unit = degradation_unit();
        let elapsed = (unit / U256::from(rate)).low_u64() + 1;
        let s = snapshot(elapsed, rate, locked, 7, 1);
        prop_assert_eq!(compute_seed(&s).unwrap().free_funds_to_inject, s.total_assets);
    }

    #[test]
    fn test_csv_round_trip(
        rows in proptest::collection::vec((any::<[u8; 20]>(), any::<u128>()), 0..40),
        decimals in 0u8..=18,
    ) {
        let recipients: Vec<Recipient> = rows
            .into_iter()
            .map(|(bytes, balance)| Recipient::new(Address::from(bytes), U256::from(balance)))
            .collect();

        let mut out = Vec::new();
        serialize(&recipients, &mut out, decimals).unwrap();
        let parsed = collect_rows(parse(out.as_slice(), "receiver", "balance", decimals).unwrap());

        prop_assert!(parsed.is_clean());
        prop_assert_eq!(parsed.recipients, recipients);
    }
}
