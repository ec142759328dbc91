//! Game creation by the contract owner.
//!
//! `Idle -> CoordinatesEncrypted -> GameCreated`. The treasure cell is
//! encrypted first; `create_game` refuses to run without both ciphertexts.

use fhe_quest_protocol::{Coordinate, Receipt, Wei};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::encryption::{EncryptedCoordinate, EncryptedValue, EncryptionOracle};
use crate::error::QuestError;
use crate::grid::GridState;
use crate::ledger::ContractTransport;
use crate::session::Session;
use crate::store::SessionStore;

pub const DEFAULT_TREASURE_ETHER: &str = "0.01";
pub const DEFAULT_DURATION_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatorState {
    Idle,
    CoordinatesEncrypted,
    GameCreated,
}

#[derive(Debug, Default)]
pub struct CreatorFlow {
    encrypted_x: Option<EncryptedValue>,
    encrypted_y: Option<EncryptedValue>,
    created: bool,
}

impl CreatorFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CreatorState {
        if self.encrypted_x.is_some() && self.encrypted_y.is_some() {
            CreatorState::CoordinatesEncrypted
        } else if self.created {
            CreatorState::GameCreated
        } else {
            CreatorState::Idle
        }
    }

    pub async fn encrypt_treasure<C, O>(
        &mut self,
        session: &Session<C, O>,
        coordinate: Coordinate,
    ) -> Result<(), QuestError>
    where
        C: ContractTransport,
        O: EncryptionOracle,
    {
        let EncryptedCoordinate { x, y } = session
            .gateway()
            .encrypt_coordinate(session.contract(), session.account(), coordinate)
            .await?;
        self.encrypted_x = Some(x);
        self.encrypted_y = Some(y);
        info!("treasure coordinates encrypted");
        Ok(())
    }

    /// Sends `createGame` with `value = treasure`, then refreshes the store.
    pub async fn create_game<C, O>(
        &mut self,
        session: &Session<C, O>,
        store: &mut SessionStore,
        grid: &mut GridState,
        treasure: Wei,
        duration_seconds: u64,
    ) -> Result<Receipt, QuestError>
    where
        C: ContractTransport,
        O: EncryptionOracle,
    {
        let (Some(x), Some(y)) = (&self.encrypted_x, &self.encrypted_y) else {
            return Err(QuestError::MissingEncryptedCoordinates);
        };
        let encrypted = EncryptedCoordinate { x: x.clone(), y: y.clone() };

        let pending = session
            .ledger()
            .create_game(treasure, duration_seconds, &encrypted, treasure)
            .await?;
        let receipt = pending.await_confirmation().await?;

        self.encrypted_x = None;
        self.encrypted_y = None;
        self.created = true;
        info!(treasure = treasure.0, duration_seconds, "game created");

        if let Err(err) = store.refresh(session.ledger(), grid, crate::unix_now()).await {
            warn!(error = %err, "refresh after game creation failed");
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_available_ciphertexts() {
        let mut flow = CreatorFlow::new();
        assert_eq!(flow.state(), CreatorState::Idle);

        let value = EncryptedValue {
            handle: vec![1u8].into(),
            proof: vec![2u8].into(),
        };
        flow.encrypted_x = Some(value.clone());
        assert_eq!(flow.state(), CreatorState::Idle);
        flow.encrypted_y = Some(value);
        assert_eq!(flow.state(), CreatorState::CoordinatesEncrypted);

        flow.encrypted_x = None;
        flow.encrypted_y = None;
        flow.created = true;
        assert_eq!(flow.state(), CreatorState::GameCreated);
    }
}
