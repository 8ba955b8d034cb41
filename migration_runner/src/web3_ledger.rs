//! JSON-RPC implementation of the ledger port

use async_trait::async_trait;
use ethereum_types::{Address, U256, U64};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use web3::{
    contract::{tokens::Detokenize, tokens::Tokenize, Contract, Options},
    signing::{Key, SecretKey, SecretKeyRef},
    transports::Http,
    types::{BlockId, BlockNumber, TransactionReceipt},
    Web3,
};

use crate::address::to_checksum;
use crate::config::ContractsConfig;
use crate::error::LedgerError;
use crate::ledger_client::{LedgerClient, LedgerCommand};
use crate::types::{LedgerSnapshot, Receipt};

const LEGACY_VAULT_ABI: &[u8] = include_bytes!("../abi/legacy_vault.json");
const TARGET_VAULT_ABI: &[u8] = include_bytes!("../abi/target_vault.json");
const REGISTRY_ABI: &[u8] = include_bytes!("../abi/registry.json");
const DISTRIBUTOR_ABI: &[u8] = include_bytes!("../abi/distributor.json");

/// Signing keys by the address they control
#[derive(Default)]
pub struct Keyring {
    keys: HashMap<Address, SecretKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hex-encoded private key, returning the address it controls
    pub fn add_hex(&mut self, private_key: &str) -> Result<Address, LedgerError> {
        let bytes = hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|e| LedgerError::UnknownSigner(format!("invalid hex private key: {}", e)))?;
        let key = SecretKey::from_slice(&bytes)
            .map_err(|e| LedgerError::UnknownSigner(format!("invalid private key: {}", e)))?;
        let address = SecretKeyRef::new(&key).address();
        self.keys.insert(address, key);
        Ok(address)
    }

    fn get(&self, signer: Address) -> Result<&SecretKey, LedgerError> {
        self.keys
            .get(&signer)
            .ok_or_else(|| LedgerError::UnknownSigner(to_checksum(&signer)))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Ledger client speaking JSON-RPC through `web3`
pub struct Web3LedgerClient {
    web3: Web3<Http>,
    contracts: ContractsConfig,
    keyring: Keyring,
    receipt_timeout: Duration,
    confirmations: usize,
}

impl Web3LedgerClient {
    pub fn new(
        rpc_url: &str,
        contracts: ContractsConfig,
        keyring: Keyring,
        receipt_timeout: Duration,
        confirmations: usize,
    ) -> Result<Self, LedgerError> {
        let transport = Http::new(rpc_url).map_err(|e| LedgerError::transport("connect", e))?;
        info!(rpc_url, signers = keyring.len(), "Ledger client ready");

        Ok(Self {
            web3: Web3::new(transport),
            contracts,
            keyring,
            receipt_timeout,
            confirmations,
        })
    }

    fn contract(&self, address: Address, abi: &[u8]) -> Result<Contract<Http>, LedgerError> {
        Contract::from_json(self.web3.eth(), address, abi).map_err(|e| LedgerError::decode("abi", e))
    }

    /// ABI for a contract address this client knows about
    fn abi_for(&self, ledger: Address) -> &'static [u8] {
        if ledger == self.contracts.registry {
            REGISTRY_ABI
        } else if ledger == self.contracts.distributor {
            DISTRIBUTOR_ABI
        } else if ledger == self.contracts.target_vault {
            TARGET_VAULT_ABI
        } else {
            LEGACY_VAULT_ABI
        }
    }

    async fn query<P, R>(&self, ledger: Address, function: &str, params: P, block: Option<BlockId>) -> Result<R, LedgerError>
    where
        P: Tokenize,
        R: Detokenize,
    {
        let contract = self.contract(ledger, self.abi_for(ledger))?;
        contract
            .query(function, params, None, Options::default(), block)
            .await
            .map_err(|e| contract_error(function, e))
    }

    async fn block_timestamp(&self, block: BlockId) -> Result<u64, LedgerError> {
        let block = self
            .web3
            .eth()
            .block(block)
            .await
            .map_err(|e| web3_error("block", e))?
            .ok_or_else(|| LedgerError::rejected("block", "reference block not found"))?;
        to_u64("block", block.timestamp)
    }

    /// Contract function name and arguments for a command
    fn encode(command: &LedgerCommand) -> (&'static str, Vec<web3::ethabi::Token>) {
        let function = command.name();
        let tokens = match command {
            LedgerCommand::Withdraw | LedgerCommand::Deposit | LedgerCommand::EmergencyExit => Vec::new(),
            LedgerCommand::WithdrawUsersWithDetectedError { users } => (users.clone(),).into_tokens(),
            LedgerCommand::InjectForMigration { seed } => {
                (seed.total_supply_to_inject, seed.free_funds_to_inject).into_tokens()
            }
            LedgerCommand::SetDepositLimit { limit } => (*limit,).into_tokens(),
            LedgerCommand::Transfer { to, amount } => (*to, *amount).into_tokens(),
            LedgerCommand::SetVault { vault } => (*vault,).into_tokens(),
            LedgerCommand::Drop { batch } => (
                batch.vault_pointer,
                batch.accounts.clone(),
                batch.balances.clone(),
                batch.total_balances,
            )
                .into_tokens(),
        };
        (function, tokens)
    }

    fn to_receipt(operation: &str, receipt: TransactionReceipt) -> Result<Receipt, LedgerError> {
        if receipt.status == Some(U64::zero()) {
            return Err(LedgerError::rejected(operation, "transaction reverted"));
        }

        Ok(Receipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
            cost_used: receipt.gas_used.unwrap_or_default(),
            effective_unit_price: receipt.effective_gas_price.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl LedgerClient for Web3LedgerClient {
    async fn read_snapshot(&self, vault: Address, at_block: u64) -> Result<LedgerSnapshot, LedgerError> {
        let block = Some(BlockId::Number(BlockNumber::Number(U64::from(at_block))));

        let (last_report, locked_profit, locked_profit_degradation_rate, total_assets, total_supply): (
            U256,
            U256,
            U256,
            U256,
            U256,
        ) = futures::try_join!(
            self.query(vault, "lastReport", (), block),
            self.query(vault, "lockedProfit", (), block),
            self.query(vault, "lockedProfitDegradation", (), block),
            self.query(vault, "totalAssets", (), block),
            self.query(vault, "totalSupply", (), block),
        )?;

        let block_timestamp = self.block_timestamp(BlockId::Number(BlockNumber::Number(U64::from(at_block)))).await?;

        Ok(LedgerSnapshot {
            as_of_block: at_block,
            block_timestamp,
            last_report_timestamp: to_u64("lastReport", last_report)?,
            locked_profit,
            locked_profit_degradation_rate,
            total_assets,
            total_supply,
        })
    }

    async fn read_balance(&self, token: Address, holder: Address) -> Result<U256, LedgerError> {
        let contract = self.contract(token, LEGACY_VAULT_ABI)?;
        contract
            .query("balanceOf", (holder,), None, Options::default(), None)
            .await
            .map_err(|e| contract_error("balanceOf", e))
    }

    async fn read_allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, LedgerError> {
        let contract = self.contract(token, LEGACY_VAULT_ABI)?;
        contract
            .query("allowance", (owner, spender), None, Options::default(), None)
            .await
            .map_err(|e| contract_error("allowance", e))
    }

    async fn read_registry_member(&self, registry: Address, index: u64) -> Result<Option<Address>, LedgerError> {
        member_or_end(self.query::<_, Address>(registry, "users", (U256::from(index),), None).await)
    }

    async fn read_registered_balance(&self, registry: Address, holder: Address) -> Result<U256, LedgerError> {
        self.query(registry, "balances", (holder,), None).await
    }

    async fn read_withdrawn(&self, registry: Address, holder: Address) -> Result<bool, LedgerError> {
        self.query(registry, "withdrawn", (holder,), None).await
    }

    async fn read_injected_once(&self, vault: Address) -> Result<bool, LedgerError> {
        self.query(vault, "isInjectedOnce", (), None).await
    }

    async fn read_vault_pointer(&self, distributor: Address) -> Result<Address, LedgerError> {
        self.query(distributor, "vault", (), None).await
    }

    async fn estimate_cost(
        &self,
        signer: Address,
        ledger: Address,
        command: &LedgerCommand,
    ) -> Result<U256, LedgerError> {
        let contract = self.contract(ledger, self.abi_for(ledger))?;
        let (function, tokens) = Self::encode(command);
        contract
            .estimate_gas(function, tokens.as_slice(), signer, Options::default())
            .await
            .map_err(|e| contract_error(function, e))
    }

    async fn submit(&self, signer: Address, ledger: Address, command: LedgerCommand) -> Result<Receipt, LedgerError> {
        let key = self.keyring.get(signer)?;
        let contract = self.contract(ledger, self.abi_for(ledger))?;
        let (function, tokens) = Self::encode(&command);

        let gas = contract
            .estimate_gas(function, tokens.as_slice(), signer, Options::default())
            .await
            .map_err(|e| contract_error(function, e))?;
        let options = Options {
            gas: Some(gas),
            ..Default::default()
        };

        debug!(
            function,
            ledger = %to_checksum(&ledger),
            signer = %to_checksum(&signer),
            gas = %gas,
            "Submitting transaction"
        );

        let pending = contract.signed_call_with_confirmations(
            function,
            tokens.as_slice(),
            options,
            self.confirmations,
            SecretKeyRef::new(key),
        );
        let receipt = tokio::time::timeout(self.receipt_timeout, pending)
            .await
            .map_err(|_| LedgerError::Timeout {
                operation: function.to_string(),
                elapsed: self.receipt_timeout,
            })?
            .map_err(|e| web3_error(function, e))?;

        Self::to_receipt(function, receipt)
    }
}

fn to_u64(operation: &str, value: U256) -> Result<u64, LedgerError> {
    if value > U256::from(u64::MAX) {
        return Err(LedgerError::decode(operation, format!("{} does not fit in u64", value)));
    }
    Ok(value.low_u64())
}

/// Out-of-range index reverts; any other failure must not end the scan
fn member_or_end(result: Result<Address, LedgerError>) -> Result<Option<Address>, LedgerError> {
    match result {
        Ok(member) if member.is_zero() => Ok(None),
        Ok(member) => Ok(Some(member)),
        Err(LedgerError::Rejected { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Node-side JSON-RPC error. Only an execution revert is the contract saying no;
/// rate limits and other node failures are transport problems.
fn rpc_error(operation: &str, code: i64, message: &str) -> LedgerError {
    let lowered = message.to_lowercase();
    if code == 3 || lowered.contains("revert") || lowered.contains("invalid opcode") {
        LedgerError::rejected(operation, message)
    } else {
        LedgerError::transport(operation, format!("rpc error {}: {}", code, message))
    }
}

fn web3_error(operation: &str, error: web3::Error) -> LedgerError {
    match error {
        web3::Error::Rpc(e) => rpc_error(operation, e.code.code(), &e.message),
        web3::Error::Decoder(e) | web3::Error::InvalidResponse(e) => LedgerError::decode(operation, e),
        other => LedgerError::transport(operation, other),
    }
}

fn contract_error(operation: &str, error: web3::contract::Error) -> LedgerError {
    match error {
        web3::contract::Error::Api(e) => web3_error(operation, e),
        other => LedgerError::decode(operation, other),
    }
}

#[allow(dead_code)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DistributionBatch, InjectionSeed, Recipient};

    #[test]
    fn test_keyring_derives_address() {
        let mut keyring = Keyring::new();
        // Well-known development key
        let address = keyring
            .add_hex("0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318")
            .unwrap();
        assert_eq!(to_checksum(&address), "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23");
        assert!(keyring.get(address).is_ok());
        assert!(matches!(keyring.get(Address::zero()), Err(LedgerError::UnknownSigner(_))));
    }

    #[test]
    fn test_bad_key_rejected() {
        let mut keyring = Keyring::new();
        assert!(keyring.add_hex("0xnothex").is_err());
        assert!(keyring.is_empty());
    }

    #[test]
    fn test_abis_parse() {
        for abi in [LEGACY_VAULT_ABI, TARGET_VAULT_ABI, REGISTRY_ABI, DISTRIBUTOR_ABI] {
            assert!(web3::ethabi::Contract::load(abi).is_ok());
        }
    }

    #[test]
    fn test_commands_match_abi_functions() {
        let batch = DistributionBatch::from_recipients(
            Address::repeat_byte(1),
            &[Recipient::new(Address::repeat_byte(2), U256::one())],
        )
        .unwrap();
        let cases = [
            (REGISTRY_ABI, LedgerCommand::Withdraw),
            (REGISTRY_ABI, LedgerCommand::WithdrawUsersWithDetectedError { users: vec![Address::repeat_byte(3)] }),
            (REGISTRY_ABI, LedgerCommand::Deposit),
            (REGISTRY_ABI, LedgerCommand::EmergencyExit),
            (
                TARGET_VAULT_ABI,
                LedgerCommand::InjectForMigration {
                    seed: InjectionSeed {
                        total_supply_to_inject: U256::one(),
                        free_funds_to_inject: U256::one(),
                    },
                },
            ),
            (TARGET_VAULT_ABI, LedgerCommand::SetDepositLimit { limit: U256::MAX }),
            (TARGET_VAULT_ABI, LedgerCommand::Transfer { to: Address::repeat_byte(4), amount: U256::one() }),
            (DISTRIBUTOR_ABI, LedgerCommand::SetVault { vault: Address::repeat_byte(5) }),
            (DISTRIBUTOR_ABI, LedgerCommand::Drop { batch }),
        ];

        for (abi, command) in cases {
            let contract = web3::ethabi::Contract::load(abi).unwrap();
            let (function, tokens) = Web3LedgerClient::encode(&command);
            let encoded = contract.function(function).unwrap().encode_input(&tokens);
            assert!(encoded.is_ok(), "{} failed to encode", function);
        }
    }

    #[test]
    fn test_only_reverts_are_rejections() {
        assert!(matches!(
            rpc_error("users", 3, "execution reverted"),
            LedgerError::Rejected { .. }
        ));
        assert!(matches!(
            rpc_error("users", -32000, "VM Exception while processing transaction: revert"),
            LedgerError::Rejected { .. }
        ));

        let limited = rpc_error("users", -32005, "daily request count exceeded, request rate limited");
        assert!(matches!(limited, LedgerError::Transport { .. }));
        assert!(limited.is_retryable());
    }

    #[test]
    fn test_registry_scan_ends_only_on_revert() {
        let member = Address::repeat_byte(7);
        assert_eq!(member_or_end(Ok(member)).unwrap(), Some(member));
        assert_eq!(member_or_end(Ok(Address::zero())).unwrap(), None);
        assert_eq!(
            member_or_end(Err(rpc_error("users", 3, "execution reverted"))).unwrap(),
            None
        );

        let limited = member_or_end(Err(rpc_error("users", -32005, "rate limited")));
        assert!(matches!(limited, Err(LedgerError::Transport { .. })));
    }
}
