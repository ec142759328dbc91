//! Encryption gateway over the external FHE oracle.
//!
//! Every plaintext is encrypted on its own input buffer bound to the
//! (contract, player) pair, so a coordinate costs two oracle round trips.
//! Failures are surfaced immediately; the gateway never retries.

use async_trait::async_trait;
use fhe_quest_protocol::{Address, Coordinate, HexBytes};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{LedgerError, OracleError, QuestError};

/// Validity window requested for user decryption permits.
pub const USER_DECRYPT_DURATION_DAYS: u32 = 10;

/// What `Buffer.encrypt()` hands back before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCiphertext {
    pub handles: Vec<Vec<u8>>,
    pub input_proof: Vec<u8>,
}

/// A pending encrypted input, filled with `add32` and sealed with `encrypt`.
#[async_trait]
pub trait InputBuffer: Send {
    fn add32(&mut self, value: u32);

    async fn encrypt(&mut self) -> Result<RawCiphertext, OracleError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    pub public_key: HexBytes,
    pub private_key: HexBytes,
}

/// Typed-data permit the player signs before a user decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip712Request {
    pub domain_name: String,
    pub domain_version: String,
    pub public_key: HexBytes,
    pub contract_addresses: Vec<Address>,
    pub start_timestamp: u64,
    pub duration_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDecryptRequest {
    pub handle_contract_pairs: Vec<(HexBytes, Address)>,
    pub keypair: Keypair,
    /// Signature hex without the `0x` prefix.
    pub signature: String,
    pub contract_addresses: Vec<Address>,
    pub user_address: Address,
    pub start_timestamp: u64,
    pub duration_days: u32,
}

/// The consumed FHE oracle (relayer) surface.
#[async_trait]
pub trait EncryptionOracle: Send + Sync + 'static {
    type Buffer: InputBuffer;

    /// False while the oracle instance is still being set up.
    fn is_ready(&self) -> bool {
        true
    }

    fn create_encrypted_input(
        &self,
        contract: &Address,
        user: &Address,
    ) -> Result<Self::Buffer, OracleError>;

    fn generate_keypair(&self) -> Keypair;

    fn create_eip712(
        &self,
        public_key: &HexBytes,
        contract_addresses: &[Address],
        start_timestamp: u64,
        duration_days: u32,
    ) -> Eip712Request;

    async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<HashMap<HexBytes, u128>, OracleError>;

    async fn public_decrypt(
        &self,
        handles: &[HexBytes],
    ) -> Result<HashMap<HexBytes, u128>, OracleError>;
}

/// Signs EIP-712 permits on behalf of the connected account.
#[async_trait]
pub trait TypedDataSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_typed_data(&self, request: &Eip712Request) -> Result<HexBytes, LedgerError>;
}

/// One encrypted 32-bit value: ciphertext handle plus input proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    pub handle: HexBytes,
    pub proof: HexBytes,
}

/// Independently encrypted x and y of a grid coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCoordinate {
    pub x: EncryptedValue,
    pub y: EncryptedValue,
}

pub struct EncryptionGateway<O> {
    oracle: Option<Arc<O>>,
}

impl<O> Clone for EncryptionGateway<O> {
    fn clone(&self) -> Self {
        Self { oracle: self.oracle.clone() }
    }
}

impl<O: EncryptionOracle> EncryptionGateway<O> {
    pub fn new(oracle: Arc<O>) -> Self {
        Self { oracle: Some(oracle) }
    }

    /// A gateway whose oracle has not been initialized yet.
    pub fn uninitialized() -> Self {
        Self { oracle: None }
    }

    pub fn is_ready(&self) -> bool {
        self.oracle.as_ref().is_some_and(|o| o.is_ready())
    }

    fn oracle(&self) -> Result<&Arc<O>, QuestError> {
        match &self.oracle {
            Some(oracle) if oracle.is_ready() => Ok(oracle),
            _ => Err(QuestError::EncryptionUnavailable),
        }
    }

    pub async fn encrypt(
        &self,
        contract: &Address,
        player: &Address,
        value: u32,
    ) -> Result<EncryptedValue, QuestError> {
        let oracle = self.oracle()?;
        let mut buffer = oracle.create_encrypted_input(contract, player)?;
        buffer.add32(value);
        let raw = buffer.encrypt().await?;

        let handle = raw
            .handles
            .into_iter()
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| OracleError::Malformed("missing ciphertext handle".into()))?;
        if raw.input_proof.is_empty() {
            return Err(OracleError::Malformed("missing input proof".into()).into());
        }

        Ok(EncryptedValue {
            handle: HexBytes::new(handle),
            proof: HexBytes::new(raw.input_proof),
        })
    }

    pub async fn encrypt_coordinate(
        &self,
        contract: &Address,
        player: &Address,
        coordinate: Coordinate,
    ) -> Result<EncryptedCoordinate, QuestError> {
        let x = self.encrypt(contract, player, coordinate.x() as u32).await?;
        let y = self.encrypt(contract, player, coordinate.y() as u32).await?;
        debug!(%coordinate, handle_x = %x.handle, handle_y = %y.handle, "coordinate encrypted");
        Ok(EncryptedCoordinate { x, y })
    }

    pub async fn public_decrypt(
        &self,
        handles: &[HexBytes],
    ) -> Result<HashMap<HexBytes, u128>, QuestError> {
        let oracle = self.oracle()?;
        Ok(oracle.public_decrypt(handles).await?)
    }

    /// Decrypts a handle the signer is allowed to read.
    pub async fn user_decrypt<S: TypedDataSigner + ?Sized>(
        &self,
        contract: &Address,
        handle: &HexBytes,
        signer: &S,
        start_timestamp: u64,
    ) -> Result<u128, QuestError> {
        let oracle = self.oracle()?;
        let keypair = oracle.generate_keypair();
        let contracts = vec![contract.clone()];
        let permit = oracle.create_eip712(
            &keypair.public_key,
            &contracts,
            start_timestamp,
            USER_DECRYPT_DURATION_DAYS,
        );
        let signature = signer.sign_typed_data(&permit).await?;

        let request = UserDecryptRequest {
            handle_contract_pairs: vec![(handle.clone(), contract.clone())],
            keypair,
            signature: hex::encode(signature.as_bytes()),
            contract_addresses: contracts,
            user_address: signer.address(),
            start_timestamp,
            duration_days: USER_DECRYPT_DURATION_DAYS,
        };

        let mut clear = oracle.user_decrypt(request).await?;
        clear.remove(handle).ok_or_else(|| {
            warn!(%handle, "user decryption result is missing the requested handle");
            QuestError::EncryptionFailure(format!("no cleartext for handle {handle}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Oracle double whose buffers return whatever the test scripted.
    struct ScriptedOracle {
        ready: AtomicBool,
        response: Result<RawCiphertext, OracleError>,
    }

    struct ScriptedBuffer {
        values: Vec<u32>,
        response: Result<RawCiphertext, OracleError>,
    }

    #[async_trait]
    impl InputBuffer for ScriptedBuffer {
        fn add32(&mut self, value: u32) {
            self.values.push(value);
        }

        async fn encrypt(&mut self) -> Result<RawCiphertext, OracleError> {
            assert_eq!(self.values.len(), 1, "one value per buffer");
            self.response.clone()
        }
    }

    #[async_trait]
    impl EncryptionOracle for ScriptedOracle {
        type Buffer = ScriptedBuffer;

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn create_encrypted_input(
            &self,
            _contract: &Address,
            _user: &Address,
        ) -> Result<ScriptedBuffer, OracleError> {
            Ok(ScriptedBuffer { values: Vec::new(), response: self.response.clone() })
        }

        fn generate_keypair(&self) -> Keypair {
            Keypair { public_key: HexBytes::new(vec![1]), private_key: HexBytes::new(vec![2]) }
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
            assert!(!request.signature.starts_with("0x"));
            assert_eq!(request.duration_days, USER_DECRYPT_DURATION_DAYS);
            Ok(request.handle_contract_pairs.into_iter().map(|(h, _)| (h, 7)).collect())
        }

        async fn public_decrypt(
            &self,
            handles: &[HexBytes],
        ) -> Result<HashMap<HexBytes, u128>, OracleError> {
            Ok(handles.iter().cloned().map(|h| (h, 3)).collect())
        }
    }

    struct FixedSigner;

    #[async_trait]
    impl TypedDataSigner for FixedSigner {
        fn address(&self) -> Address {
            Address::from_bytes([9; 20])
        }

        async fn sign_typed_data(&self, _request: &Eip712Request) -> Result<HexBytes, LedgerError> {
            Ok(HexBytes::new(vec![0xde, 0xad]))
        }
    }

    fn gateway(response: Result<RawCiphertext, OracleError>) -> EncryptionGateway<ScriptedOracle> {
        EncryptionGateway::new(Arc::new(ScriptedOracle { ready: AtomicBool::new(true), response }))
    }

    fn addrs() -> (Address, Address) {
        (Address::from_bytes([1; 20]), Address::from_bytes([2; 20]))
    }

    #[tokio::test]
    async fn encrypt_renders_fixed_prefix_hex() {
        let gw = gateway(Ok(RawCiphertext {
            handles: vec![vec![0x00, 0x0f, 0xa0]],
            input_proof: vec![0x01],
        }));
        let (contract, player) = addrs();
        let value = gw.encrypt(&contract, &player, 4).await.unwrap();
        assert_eq!(value.handle.to_hex(), "0x000fa0");
        assert_eq!(value.proof.to_hex(), "0x01");
    }

    #[tokio::test]
    async fn uninitialized_gateway_is_unavailable() {
        let gw = EncryptionGateway::<ScriptedOracle>::uninitialized();
        let (contract, player) = addrs();
        assert!(!gw.is_ready());
        assert_eq!(
            gw.encrypt(&contract, &player, 1).await,
            Err(QuestError::EncryptionUnavailable)
        );

        let not_ready = EncryptionGateway::new(Arc::new(ScriptedOracle {
            ready: AtomicBool::new(false),
            response: Ok(RawCiphertext::default()),
        }));
        assert_eq!(
            not_ready.encrypt(&contract, &player, 1).await,
            Err(QuestError::EncryptionUnavailable)
        );
    }

    #[tokio::test]
    async fn malformed_shapes_are_encryption_failures() {
        let (contract, player) = addrs();

        let no_handle = gateway(Ok(RawCiphertext { handles: vec![], input_proof: vec![1] }));
        assert!(matches!(
            no_handle.encrypt(&contract, &player, 1).await,
            Err(QuestError::EncryptionFailure(_))
        ));

        let empty_handle = gateway(Ok(RawCiphertext { handles: vec![vec![]], input_proof: vec![1] }));
        assert!(matches!(
            empty_handle.encrypt(&contract, &player, 1).await,
            Err(QuestError::EncryptionFailure(_))
        ));

        let no_proof = gateway(Ok(RawCiphertext { handles: vec![vec![1]], input_proof: vec![] }));
        assert!(matches!(
            no_proof.encrypt(&contract, &player, 1).await,
            Err(QuestError::EncryptionFailure(_))
        ));

        let throws = gateway(Err(OracleError::Call("relayer down".into())));
        assert_eq!(
            throws.encrypt(&contract, &player, 1).await,
            Err(QuestError::EncryptionFailure("relayer down".into()))
        );
    }

    #[tokio::test]
    async fn decrypt_flows_forward_to_the_oracle() {
        let gw = gateway(Ok(RawCiphertext::default()));
        let (contract, _) = addrs();
        let handle = HexBytes::new(vec![0xaa; 32]);

        let clear = gw.user_decrypt(&contract, &handle, &FixedSigner, 1_700_000_000).await.unwrap();
        assert_eq!(clear, 7);

        let public = gw.public_decrypt(&[handle.clone()]).await.unwrap();
        assert_eq!(public.get(&handle), Some(&3));
    }
}
