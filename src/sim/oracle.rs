//! In-process stand-in for the FHE relayer.
//!
//! A "ciphertext" is a bincode envelope of (contract, user, values, nonce).
//! The input proof is the envelope itself and the handle is its keccak-256,
//! so the devnet can check the binding and recover the plaintext the way
//! the real coprocessor would after decryption.

use async_trait::async_trait;
use fhe_quest_protocol::{Address, HexBytes};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tiny_keccak::{Hasher, Keccak};

use crate::encryption::{
    Eip712Request, EncryptionOracle, InputBuffer, Keypair, RawCiphertext, UserDecryptRequest,
};
use crate::error::OracleError;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherEnvelope {
    pub contract: [u8; 20],
    pub user: [u8; 20],
    pub values: Vec<u32>,
    pub nonce: u64,
}

impl CipherEnvelope {
    /// Decodes a proof and checks it hashes to `handle`.
    pub fn open(handle: &[u8], proof: &[u8]) -> Result<Self, OracleError> {
        if keccak256(proof).as_slice() != handle {
            return Err(OracleError::Malformed("handle does not match input proof".into()));
        }
        bincode::deserialize(proof).map_err(|e| OracleError::Malformed(e.to_string()))
    }

    pub fn is_bound_to(&self, contract: &Address, user: &Address) -> bool {
        self.contract == contract.to_bytes() && self.user == user.to_bytes()
    }
}

type Registry = Arc<Mutex<HashMap<Vec<u8>, CipherEnvelope>>>;

pub struct SimOracle {
    ready: AtomicBool,
    nonce: Arc<AtomicU64>,
    registry: Registry,
}

impl Default for SimOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl SimOracle {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            nonce: Arc::new(AtomicU64::new(0)),
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn lookup(&self, handle: &HexBytes) -> Option<CipherEnvelope> {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.get(handle.as_bytes()).cloned()
    }
}

pub struct SimBuffer {
    contract: [u8; 20],
    user: [u8; 20],
    values: Vec<u32>,
    nonce: Arc<AtomicU64>,
    registry: Registry,
}

#[async_trait]
impl InputBuffer for SimBuffer {
    fn add32(&mut self, value: u32) {
        self.values.push(value);
    }

    async fn encrypt(&mut self) -> Result<RawCiphertext, OracleError> {
        if self.values.is_empty() {
            return Err(OracleError::Call("encrypted input is empty".into()));
        }
        let envelope = CipherEnvelope {
            contract: self.contract,
            user: self.user,
            values: std::mem::take(&mut self.values),
            nonce: self.nonce.fetch_add(1, Ordering::SeqCst),
        };
        let proof = bincode::serialize(&envelope).map_err(|e| OracleError::Call(e.to_string()))?;
        let handle = keccak256(&proof).to_vec();
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.clone(), envelope);
        Ok(RawCiphertext { handles: vec![handle], input_proof: proof })
    }
}

#[async_trait]
impl EncryptionOracle for SimOracle {
    type Buffer = SimBuffer;

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn create_encrypted_input(
        &self,
        contract: &Address,
        user: &Address,
    ) -> Result<SimBuffer, OracleError> {
        if !self.is_ready() {
            return Err(OracleError::NotInitialized);
        }
        Ok(SimBuffer {
            contract: contract.to_bytes(),
            user: user.to_bytes(),
            values: Vec::new(),
            nonce: self.nonce.clone(),
            registry: self.registry.clone(),
        })
    }

    fn generate_keypair(&self) -> Keypair {
        let seed = self.nonce.fetch_add(1, Ordering::SeqCst).to_be_bytes();
        let private_key = keccak256(&seed);
        let public_key = keccak256(&private_key);
        Keypair {
            public_key: HexBytes::new(public_key.to_vec()),
            private_key: HexBytes::new(private_key.to_vec()),
        }
    }

    fn create_eip712(
        &self,
        public_key: &HexBytes,
        contract_addresses: &[Address],
        start_timestamp: u64,
        duration_days: u32,
    ) -> Eip712Request {
        Eip712Request {
            domain_name: "Decryption".into(),
            domain_version: "1".into(),
            public_key: public_key.clone(),
            contract_addresses: contract_addresses.to_vec(),
            start_timestamp,
            duration_days,
        }
    }

    async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<HashMap<HexBytes, u128>, OracleError> {
        if request.signature.is_empty() {
            return Err(OracleError::Call("missing permit signature".into()));
        }
        let mut out = HashMap::new();
        for (handle, contract) in request.handle_contract_pairs {
            let envelope = self
                .lookup(&handle)
                .ok_or_else(|| OracleError::Call(format!("unknown handle {handle}")))?;
            if !envelope.is_bound_to(&contract, &request.user_address) {
                return Err(OracleError::Call(format!("{} may not decrypt {handle}", request.user_address)));
            }
            let value = envelope.values.first().copied().unwrap_or_default();
            out.insert(handle, value as u128);
        }
        Ok(out)
    }

    async fn public_decrypt(
        &self,
        handles: &[HexBytes],
    ) -> Result<HashMap<HexBytes, u128>, OracleError> {
        handles
            .iter()
            .map(|handle| {
                let envelope = self
                    .lookup(handle)
                    .ok_or_else(|| OracleError::Call(format!("unknown handle {handle}")))?;
                let value = envelope.values.first().copied().unwrap_or_default();
                Ok((handle.clone(), value as u128))
            })
            .collect()
    }
}
