//! Local simulation of the external collaborators: FHE relayer, contract
//! and wallet. Used by the host binary and the integration tests.

mod devnet;
mod oracle;

pub use devnet::{Devnet, DevnetConfig};
pub use oracle::{keccak256, CipherEnvelope, SimBuffer, SimOracle};

use async_trait::async_trait;
use fhe_quest_protocol::{Address, HexBytes};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use crate::encryption::{Eip712Request, TypedDataSigner};
use crate::error::{LedgerError, USER_REJECTED_CODE};
use crate::session::{ChainParams, WalletProvider, UNRECOGNIZED_CHAIN_CODE};

#[derive(Debug)]
struct WalletState {
    accounts: Vec<Address>,
    chain_id: u64,
    known_chains: BTreeSet<u64>,
    reject_switch: bool,
}

/// Browser-wallet stand-in. Accounts and network can be changed from the
/// outside to exercise session replacement.
#[derive(Debug)]
pub struct SimWallet {
    state: Mutex<WalletState>,
}

impl SimWallet {
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        Self {
            state: Mutex::new(WalletState {
                accounts,
                chain_id,
                known_chains: BTreeSet::from([chain_id]),
                reject_switch: false,
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut WalletState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.with(|s| s.accounts = accounts);
    }

    pub fn set_chain(&self, chain_id: u64) {
        self.with(|s| {
            s.known_chains.insert(chain_id);
            s.chain_id = chain_id;
        });
    }

    /// Makes the wallet forget a chain so switching to it needs an add.
    pub fn forget_chain(&self, chain_id: u64) {
        self.with(|s| s.known_chains.remove(&chain_id));
    }

    pub fn reject_switch(&self, reject: bool) {
        self.with(|s| s.reject_switch = reject);
    }

    pub fn knows_chain(&self, chain_id: u64) -> bool {
        self.with(|s| s.known_chains.contains(&chain_id))
    }
}

#[async_trait]
impl WalletProvider for SimWallet {
    async fn accounts(&self) -> Result<Vec<Address>, LedgerError> {
        Ok(self.with(|s| s.accounts.clone()))
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        Ok(self.with(|s| s.chain_id))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), LedgerError> {
        self.with(|s| {
            if s.reject_switch {
                return Err(LedgerError::Provider {
                    code: Some(USER_REJECTED_CODE),
                    message: "user rejected the request".into(),
                });
            }
            if !s.known_chains.contains(&chain_id) {
                return Err(LedgerError::Provider {
                    code: Some(UNRECOGNIZED_CHAIN_CODE),
                    message: format!("unrecognized chain id {chain_id:#x}"),
                });
            }
            s.chain_id = chain_id;
            Ok(())
        })
    }

    async fn add_chain(&self, params: &ChainParams) -> Result<(), LedgerError> {
        self.with(|s| {
            s.known_chains.insert(params.chain_id);
            s.chain_id = params.chain_id;
        });
        Ok(())
    }
}

/// Signs permits with a keccak over the bincode-encoded request.
#[derive(Debug, Clone)]
pub struct SimSigner {
    account: Address,
}

impl SimSigner {
    pub fn new(account: Address) -> Self {
        Self { account }
    }
}

#[async_trait]
impl TypedDataSigner for SimSigner {
    fn address(&self) -> Address {
        self.account.clone()
    }

    async fn sign_typed_data(&self, request: &Eip712Request) -> Result<HexBytes, LedgerError> {
        let mut preimage = self.account.to_bytes().to_vec();
        preimage.extend(bincode::serialize(request).map_err(|e| LedgerError::Provider {
            code: None,
            message: e.to_string(),
        })?);
        Ok(HexBytes::new(keccak256(&preimage).to_vec()))
    }
}
