//! Wallet session: account, network, ledger client and encryption gateway
//! as one immutable value.
//!
//! A session is never patched in place. An account or network change
//! builds a new one and the old one is dropped together with everything
//! derived from it.

use async_trait::async_trait;
use fhe_quest_protocol::Address;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{QuestConfig, SEPOLIA_CHAIN_ID};
use crate::encryption::{EncryptionGateway, EncryptionOracle};
use crate::error::{LedgerError, QuestError};
use crate::ledger::{ContractTransport, GasLimits, LedgerClient};

/// Provider error code for "chain not added to wallet".
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

/// Parameters handed to the wallet when it does not know the target chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub chain_id: u64,
    pub chain_name: String,
    pub currency_symbol: String,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl ChainParams {
    pub fn sepolia() -> Self {
        Self {
            chain_id: SEPOLIA_CHAIN_ID,
            chain_name: "Sepolia Test Network".into(),
            currency_symbol: "ETH".into(),
            rpc_urls: vec![
                "https://rpc.sepolia.org".into(),
                "https://ethereum-sepolia.publicnode.com".into(),
                "https://sepolia.gateway.tenderly.co".into(),
            ],
            block_explorer_urls: vec!["https://sepolia.etherscan.io".into()],
        }
    }
}

/// External wallet collaborator.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn accounts(&self) -> Result<Vec<Address>, LedgerError>;

    async fn chain_id(&self) -> Result<u64, LedgerError>;

    async fn switch_chain(&self, chain_id: u64) -> Result<(), LedgerError>;

    async fn add_chain(&self, params: &ChainParams) -> Result<(), LedgerError>;
}

/// Asks the wallet to move to the configured chain, adding it first if the
/// wallet does not know it.
pub async fn ensure_network<W: WalletProvider + ?Sized>(
    wallet: &W,
    config: &QuestConfig,
) -> Result<(), QuestError> {
    let current = wallet.chain_id().await?;
    if current == config.target_chain_id {
        return Ok(());
    }
    info!(current, target = config.target_chain_id, "switching wallet network");
    match wallet.switch_chain(config.target_chain_id).await {
        Ok(()) => Ok(()),
        Err(LedgerError::Provider { code: Some(UNRECOGNIZED_CHAIN_CODE), .. })
            if config.target_chain_id == SEPOLIA_CHAIN_ID =>
        {
            warn!("wallet does not know the target chain; adding it");
            wallet.add_chain(&ChainParams::sepolia()).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

pub struct Session<C, O> {
    account: Address,
    chain_id: u64,
    contract: Address,
    ledger: LedgerClient<C>,
    gateway: EncryptionGateway<O>,
}

impl<C, O> Clone for Session<C, O> {
    fn clone(&self) -> Self {
        Self {
            account: self.account.clone(),
            chain_id: self.chain_id,
            contract: self.contract.clone(),
            ledger: self.ledger.clone(),
            gateway: self.gateway.clone(),
        }
    }
}

impl<C: ContractTransport, O: EncryptionOracle> Session<C, O> {
    /// Builds a session for the wallet's first account. Fails with
    /// `NetworkMismatch` when the wallet is on another chain.
    pub async fn open<W: WalletProvider + ?Sized>(
        wallet: &W,
        transport: Arc<C>,
        gateway: EncryptionGateway<O>,
        config: &QuestConfig,
    ) -> Result<Self, QuestError> {
        let account = wallet
            .accounts()
            .await?
            .into_iter()
            .next()
            .ok_or(QuestError::NotConnected)?;
        let chain_id = wallet.chain_id().await?;
        if chain_id != config.target_chain_id {
            return Err(QuestError::NetworkMismatch {
                expected: config.target_chain_id,
                actual: chain_id,
            });
        }
        info!(%account, chain_id, contract = %config.contract_address, "session opened");
        Ok(Self::assemble(account, chain_id, transport, gateway, config))
    }

    /// Assembles a session from already-verified parts.
    pub fn assemble(
        account: Address,
        chain_id: u64,
        transport: Arc<C>,
        gateway: EncryptionGateway<O>,
        config: &QuestConfig,
    ) -> Self {
        let gas = GasLimits { search: config.search_gas_limit, create: config.create_gas_limit };
        Self {
            ledger: LedgerClient::new(transport, account.clone(), gas),
            account,
            chain_id,
            contract: config.contract_address.clone(),
            gateway,
        }
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn contract(&self) -> &Address {
        &self.contract
    }

    pub fn ledger(&self) -> &LedgerClient<C> {
        &self.ledger
    }

    pub fn gateway(&self) -> &EncryptionGateway<O> {
        &self.gateway
    }
}
