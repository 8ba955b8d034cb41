//! Bounded probing of the migration registry's member list
//!
//! The registry exposes members by index but no length accessor. The list
//! is walked from index 0 until the first missing index or until the
//! caller's ceiling, whichever comes first.

use ethereum_types::Address;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::address::to_checksum;
use crate::error::LedgerError;
use crate::ledger_client::LedgerClient;

/// Lazy, restartable cursor over registry members.
pub struct RegistryCursor {
    client: Arc<dyn LedgerClient>,
    registry: Address,
    ceiling: u64,
    position: u64,
    exhausted: bool,
    /// A member exists at the ceiling index
    beyond_ceiling: bool,
}

impl RegistryCursor {
    pub fn new(client: Arc<dyn LedgerClient>, registry: Address, ceiling: u64) -> Self {
        Self {
            client,
            registry,
            ceiling,
            position: 0,
            exhausted: false,
            beyond_ceiling: false,
        }
    }

    /// Next member, or `None` once the registry end or the ceiling is reached.
    ///
    /// Reaching the ceiling costs one extra read at the ceiling index so a
    /// registry of exactly `ceiling` members is told apart from a longer one.
    pub async fn next(&mut self) -> Result<Option<Address>, LedgerError> {
        if self.exhausted || self.beyond_ceiling {
            return Ok(None);
        }
        if self.position >= self.ceiling {
            match self.client.read_registry_member(self.registry, self.ceiling).await? {
                Some(_) => self.beyond_ceiling = true,
                None => self.exhausted = true,
            }
            return Ok(None);
        }

        match self.client.read_registry_member(self.registry, self.position).await? {
            Some(member) => {
                self.position += 1;
                Ok(Some(member))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Rewind to index 0 so membership can be re-derived from live state.
    pub fn reset(&mut self) {
        self.position = 0;
        self.exhausted = false;
        self.beyond_ceiling = false;
    }

    /// Members yielded so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// True when members exist past the ceiling that the scan did not read
    pub fn hit_ceiling(&self) -> bool {
        self.beyond_ceiling
    }
}

/// Walk the whole registry from index 0 (bounded by `max_users`).
pub async fn collect_members(
    client: Arc<dyn LedgerClient>,
    registry: Address,
    max_users: u64,
) -> Result<Vec<Address>, LedgerError> {
    let mut cursor = RegistryCursor::new(client, registry, max_users);
    let mut members = Vec::new();
    while let Some(member) = cursor.next().await? {
        members.push(member);
    }

    if cursor.hit_ceiling() {
        warn!(
            registry = %to_checksum(&registry),
            max_users,
            "Registry scan stopped at ceiling; later members were not read"
        );
    } else {
        debug!(registry = %to_checksum(&registry), count = members.len(), "Registry scan complete");
    }

    Ok(members)
}

#[allow(dead_code)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_ledger::{InMemoryLedger, LedgerAddresses};

    fn registry() -> Address {
        LedgerAddresses::default().registry
    }

    fn ledger_with_members(count: u64) -> Arc<dyn LedgerClient> {
        let ledger = InMemoryLedger::new(LedgerAddresses::default());
        for i in 0..count {
            ledger.register_member(Address::from_low_u64_be(1_000 + i), 0u64.into());
        }
        Arc::new(ledger)
    }

    #[tokio::test]
    async fn test_scan_stops_at_registry_end() {
        let ledger = Arc::new(InMemoryLedger::new(LedgerAddresses::default()));
        for i in 0..77 {
            ledger.register_member(Address::from_low_u64_be(1_000 + i), 0u64.into());
        }
        let client: Arc<dyn LedgerClient> = ledger.clone();

        let members = collect_members(client, registry(), 1000).await.unwrap();
        assert_eq!(members.len(), 77);
        assert_eq!(members[0], Address::from_low_u64_be(1_000));
        // 77 hits plus the single read that found the end
        assert_eq!(ledger.read_count("read_registry_member"), 78);
    }

    #[tokio::test]
    async fn test_scan_respects_ceiling() {
        let client = ledger_with_members(10);
        let mut cursor = RegistryCursor::new(client, registry(), 4);
        let mut seen = 0;
        while cursor.next().await.unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 4);
        assert!(cursor.hit_ceiling());
    }

    #[tokio::test]
    async fn test_registry_exactly_at_ceiling_is_complete() {
        let ledger = Arc::new(InMemoryLedger::new(LedgerAddresses::default()));
        for i in 0..4 {
            ledger.register_member(Address::from_low_u64_be(1_000 + i), 0u64.into());
        }
        let client: Arc<dyn LedgerClient> = ledger.clone();

        let mut cursor = RegistryCursor::new(client, registry(), 4);
        while cursor.next().await.unwrap().is_some() {}

        assert_eq!(cursor.position(), 4);
        assert!(!cursor.hit_ceiling());
        assert_eq!(ledger.read_count("read_registry_member"), 5);
        // Finished cursors stay finished without probing again
        assert!(cursor.next().await.unwrap().is_none());
        assert_eq!(ledger.read_count("read_registry_member"), 5);
    }

    #[tokio::test]
    async fn test_cursor_restarts() {
        let client = ledger_with_members(2);
        let mut cursor = RegistryCursor::new(client, registry(), 100);
        while cursor.next().await.unwrap().is_some() {}
        assert_eq!(cursor.position(), 2);
        assert!(!cursor.hit_ceiling());

        cursor.reset();
        assert_eq!(cursor.next().await.unwrap(), Some(Address::from_low_u64_be(1_000)));
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let client = ledger_with_members(0);
        assert!(collect_members(client, registry(), 1000).await.unwrap().is_empty());
    }
}
