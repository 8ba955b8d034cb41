//! Query/command port to the legacy vault, migration registry, target vault
//! and distributor
//!
//! Every read is a point-in-time answer; every submit blocks until a
//! terminal receipt and is never retried here. Retry policy belongs to the
//! coordinator, which re-reads live state before trying again.

use async_trait::async_trait;
use ethereum_types::{Address, U256};
use std::sync::Arc;

use crate::error::LedgerError;
use crate::types::{DistributionBatch, InjectionSeed, LedgerSnapshot, Receipt};

/// State-changing commands understood by the ledger contracts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCommand {
    /// Registry pulls every registered, currently-eligible holder into custody
    Withdraw,
    /// Registry retries withdrawal for an explicit subset of holders
    WithdrawUsersWithDetectedError { users: Vec<Address> },
    /// Target vault one-time accounting bootstrap
    InjectForMigration { seed: InjectionSeed },
    /// Target vault deposit ceiling
    SetDepositLimit { limit: U256 },
    /// Registry deposits its custody into the target vault
    Deposit,
    /// Registry settles and routes the residual to the treasury
    EmergencyExit,
    /// Target vault share transfer from the signer
    Transfer { to: Address, amount: U256 },
    /// Distributor source-of-truth vault
    SetVault { vault: Address },
    /// Distributor fan-out credit
    Drop { batch: DistributionBatch },
}

impl LedgerCommand {
    /// Contract function name, used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCommand::Withdraw => "withdraw",
            LedgerCommand::WithdrawUsersWithDetectedError { .. } => "withdrawUsersWithDetectedError",
            LedgerCommand::InjectForMigration { .. } => "injectForMigration",
            LedgerCommand::SetDepositLimit { .. } => "setDepositLimit",
            LedgerCommand::Deposit => "deposit",
            LedgerCommand::EmergencyExit => "emergencyExit",
            LedgerCommand::Transfer { .. } => "transfer",
            LedgerCommand::SetVault { .. } => "setVault",
            LedgerCommand::Drop { .. } => "drop",
        }
    }
}

/// Port to the external ledger.
///
/// Implementations must be safe to share across tasks; reconciliation fans
/// reads out concurrently.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Vault accounting fields plus the reference block's own timestamp
    async fn read_snapshot(&self, vault: Address, at_block: u64) -> Result<LedgerSnapshot, LedgerError>;

    async fn read_balance(&self, token: Address, holder: Address) -> Result<U256, LedgerError>;

    async fn read_allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, LedgerError>;

    /// `None` marks the end of the registry; it is not an error.
    async fn read_registry_member(&self, registry: Address, index: u64) -> Result<Option<Address>, LedgerError>;

    async fn read_registered_balance(&self, registry: Address, holder: Address) -> Result<U256, LedgerError>;

    async fn read_withdrawn(&self, registry: Address, holder: Address) -> Result<bool, LedgerError>;

    async fn read_injected_once(&self, vault: Address) -> Result<bool, LedgerError>;

    async fn read_vault_pointer(&self, distributor: Address) -> Result<Address, LedgerError>;

    /// Gas-equivalent cost the command would consume if submitted now
    async fn estimate_cost(
        &self,
        signer: Address,
        ledger: Address,
        command: &LedgerCommand,
    ) -> Result<U256, LedgerError>;

    async fn submit(&self, signer: Address, ledger: Address, command: LedgerCommand) -> Result<Receipt, LedgerError>;
}

/// A ledger client bound to one signing identity.
#[derive(Clone)]
pub struct ScopedClient {
    client: Arc<dyn LedgerClient>,
    identity: Address,
}

impl ScopedClient {
    pub fn new(client: Arc<dyn LedgerClient>, identity: Address) -> Self {
        Self { client, identity }
    }

    pub fn identity(&self) -> Address {
        self.identity
    }

    /// Underlying client for reads
    pub fn reader(&self) -> &Arc<dyn LedgerClient> {
        &self.client
    }

    pub async fn estimate_cost(&self, ledger: Address, command: &LedgerCommand) -> Result<U256, LedgerError> {
        self.client.estimate_cost(self.identity, ledger, command).await
    }

    pub async fn submit(&self, ledger: Address, command: LedgerCommand) -> Result<Receipt, LedgerError> {
        self.client.submit(self.identity, ledger, command).await
    }
}

/// `client.acting_as(identity)` for shared clients
pub trait ActingAs {
    fn acting_as(&self, identity: Address) -> ScopedClient;
}

impl ActingAs for Arc<dyn LedgerClient> {
    fn acting_as(&self, identity: Address) -> ScopedClient {
        ScopedClient::new(Arc::clone(self), identity)
    }
}
