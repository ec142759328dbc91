//! Typed façade over the treasure-hunt contract.
//!
//! All ABI encoding and decoding happens here. Callers see typed stats,
//! pending transactions and a stream of [`ContractEvent`]s; every failure
//! is already classified into [`QuestError`].

pub mod events;

use async_trait::async_trait;
use fhe_quest_protocol::{Address, RawLog, Receipt, Token, TxHash, Wei};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::encryption::EncryptedCoordinate;
use crate::error::{LedgerError, QuestError};

pub use events::{ContractEvent, EventStream};

/// A write request as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub method: &'static str,
    pub args: Vec<Token>,
    pub value: Wei,
    pub gas_limit: u64,
}

/// Raw access to one deployed contract.
#[async_trait]
pub trait ContractTransport: Send + Sync + 'static {
    /// Read-only call.
    async fn call(
        &self,
        from: &Address,
        method: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>, LedgerError>;

    /// Signs and broadcasts a transaction.
    async fn send(&self, request: TxRequest) -> Result<TxHash, LedgerError>;

    /// Resolves once the transaction is mined.
    async fn wait_receipt(&self, tx: TxHash) -> Result<Receipt, LedgerError>;

    /// Subscribes to every log of the contract, in emission order.
    fn subscribe(&self) -> broadcast::Receiver<RawLog>;
}

/// The contract's view of the current game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: u64,
    pub creator: Address,
    pub treasure_amount: Wei,
    pub duration_seconds: u64,
    pub start_time: u64,
    pub is_active: bool,
    pub is_completed: bool,
    pub winner: Option<Address>,
    pub total_attempts: u64,
    pub total_revenue: Wei,
}

impl GameSession {
    /// Active on-chain and not completed.
    pub fn accepts_attempts(&self) -> bool {
        self.is_active && !self.is_completed
    }

    pub fn end_time(&self) -> u64 {
        self.start_time.saturating_add(self.duration_seconds)
    }

    /// `max(0, start + duration - now)`.
    pub fn remaining_at(&self, now: u64) -> u64 {
        self.end_time().saturating_sub(now)
    }

    fn decode(tokens: &[Token]) -> Result<Self, LedgerError> {
        if tokens.len() != 10 {
            return Err(LedgerError::Decode(format!(
                "getGameStats returned {} values, expected 10",
                tokens.len()
            )));
        }
        let winner = tokens[7].as_address()?.clone();
        Ok(Self {
            id: tokens[0].as_u64()?,
            creator: tokens[1].as_address()?.clone(),
            treasure_amount: Wei(tokens[2].as_uint()?),
            duration_seconds: tokens[3].as_u64()?,
            start_time: tokens[4].as_u64()?,
            is_active: tokens[5].as_bool()?,
            is_completed: tokens[6].as_bool()?,
            winner: (!winner.is_zero()).then_some(winner),
            total_attempts: tokens[8].as_u64()?,
            total_revenue: Wei(tokens[9].as_uint()?),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub wrong_attempts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasLimits {
    pub search: u64,
    pub create: u64,
}

impl Default for GasLimits {
    fn default() -> Self {
        Self { search: 500_000, create: 1_000_000 }
    }
}

fn single(method: &str, tokens: Vec<Token>) -> Result<Token, LedgerError> {
    let mut iter = tokens.into_iter();
    match (iter.next(), iter.next()) {
        (Some(token), None) => Ok(token),
        _ => Err(LedgerError::Decode(format!("{method} must return exactly one value"))),
    }
}

/// Ledger client bound to one account and one contract.
pub struct LedgerClient<C> {
    transport: Arc<C>,
    account: Address,
    gas: GasLimits,
}

impl<C> Clone for LedgerClient<C> {
    fn clone(&self) -> Self {
        Self { transport: self.transport.clone(), account: self.account.clone(), gas: self.gas }
    }
}

impl<C: ContractTransport> LedgerClient<C> {
    pub fn new(transport: Arc<C>, account: Address, gas: GasLimits) -> Self {
        Self { transport, account, gas }
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    async fn read(&self, method: &str, args: Vec<Token>) -> Result<Vec<Token>, QuestError> {
        debug!(method, "contract read");
        Ok(self.transport.call(&self.account, method, args).await?)
    }

    pub async fn get_game_stats(&self) -> Result<GameSession, QuestError> {
        let tokens = self.read("getGameStats", vec![]).await?;
        Ok(GameSession::decode(&tokens)?)
    }

    pub async fn get_player_stats(&self, player: &Address) -> Result<PlayerStats, QuestError> {
        let tokens = self.read("getPlayerStats", vec![Token::Address(player.clone())]).await?;
        let wrong_attempts = single("getPlayerStats", tokens)?.as_u64().map_err(LedgerError::from)?;
        Ok(PlayerStats { wrong_attempts })
    }

    pub async fn get_attempt_fee(&self) -> Result<Wei, QuestError> {
        let tokens = self.read("getAttemptFee", vec![]).await?;
        let fee = single("getAttemptFee", tokens)?.as_uint().map_err(LedgerError::from)?;
        Ok(Wei(fee))
    }

    pub async fn owner(&self) -> Result<Address, QuestError> {
        let tokens = self.read("owner", vec![]).await?;
        let token = single("owner", tokens)?;
        Ok(token.as_address().map_err(LedgerError::from)?.clone())
    }

    pub async fn is_decryption_pending(&self) -> Result<bool, QuestError> {
        let tokens = self.read("isDecryptionPending", vec![]).await?;
        Ok(single("isDecryptionPending", tokens)?.as_bool().map_err(LedgerError::from)?)
    }

    async fn write(
        &self,
        method: &'static str,
        args: Vec<Token>,
        value: Wei,
        gas_limit: u64,
    ) -> Result<PendingTx<C>, QuestError> {
        let request = TxRequest { from: self.account.clone(), method, args, value, gas_limit };
        let hash = self.transport.send(request).await?;
        info!(method, tx = %hash, value = value.0, "transaction broadcast");
        Ok(PendingTx { transport: self.transport.clone(), hash, method })
    }

    /// `searchTreasure(handleX, handleY, proofX, proofY)` paying `value`.
    pub async fn submit_search(
        &self,
        encrypted: &EncryptedCoordinate,
        value: Wei,
    ) -> Result<PendingTx<C>, QuestError> {
        let args = vec![
            Token::Bytes(encrypted.x.handle.clone()),
            Token::Bytes(encrypted.y.handle.clone()),
            Token::Bytes(encrypted.x.proof.clone()),
            Token::Bytes(encrypted.y.proof.clone()),
        ];
        self.write("searchTreasure", args, value, self.gas.search).await
    }

    /// `createGame(treasureValue, duration, handleX, handleY, proofX, proofY)`.
    pub async fn create_game(
        &self,
        treasure_value: Wei,
        duration_seconds: u64,
        encrypted: &EncryptedCoordinate,
        value: Wei,
    ) -> Result<PendingTx<C>, QuestError> {
        let args = vec![
            Token::Uint(treasure_value.0),
            Token::Uint(duration_seconds as u128),
            Token::Bytes(encrypted.x.handle.clone()),
            Token::Bytes(encrypted.y.handle.clone()),
            Token::Bytes(encrypted.x.proof.clone()),
            Token::Bytes(encrypted.y.proof.clone()),
        ];
        self.write("createGame", args, value, self.gas.create).await
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.transport.subscribe())
    }
}

/// A broadcast transaction that has not been mined yet.
pub struct PendingTx<C> {
    transport: Arc<C>,
    hash: TxHash,
    method: &'static str,
}

impl<C: ContractTransport> PendingTx<C> {
    pub fn hash(&self) -> TxHash {
        self.hash
    }

    /// Waits for the receipt; a non-success status is `TransactionReverted`.
    pub async fn await_confirmation(self) -> Result<Receipt, QuestError> {
        let receipt = self.transport.wait_receipt(self.hash).await?;
        if !receipt.is_success() {
            let reason = receipt
                .revert_reason
                .clone()
                .unwrap_or_else(|| "transaction failed - check contract requirements".into());
            warn!(method = self.method, tx = %self.hash, %reason, "transaction reverted");
            return Err(QuestError::TransactionReverted(reason));
        }
        info!(
            method = self.method,
            tx = %self.hash,
            block = receipt.block_number,
            gas_used = receipt.gas_used,
            "transaction confirmed"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_tokens(winner: Address) -> Vec<Token> {
        vec![
            Token::Uint(3),
            Token::Address(Address::from_bytes([1; 20])),
            Token::Uint(10_000_000_000_000_000),
            Token::Uint(3600),
            Token::Uint(1_700_000_000),
            Token::Bool(true),
            Token::Bool(false),
            Token::Address(winner),
            Token::Uint(12),
            Token::Uint(12_000_000_000_000_000),
        ]
    }

    #[test]
    fn game_stats_decode_maps_zero_winner_to_none() {
        let game = GameSession::decode(&stats_tokens(Address::zero())).unwrap();
        assert_eq!(game.id, 3);
        assert_eq!(game.winner, None);
        assert!(game.accepts_attempts());
        assert_eq!(game.end_time(), 1_700_003_600);
        assert_eq!(game.remaining_at(1_700_003_000), 600);
        assert_eq!(game.remaining_at(1_800_000_000), 0);

        let winner = Address::from_bytes([7; 20]);
        let game = GameSession::decode(&stats_tokens(winner.clone())).unwrap();
        assert_eq!(game.winner, Some(winner));
    }

    #[test]
    fn game_stats_decode_rejects_wrong_arity() {
        let mut tokens = stats_tokens(Address::zero());
        tokens.pop();
        assert!(matches!(GameSession::decode(&tokens), Err(LedgerError::Decode(_))));
    }

    #[test]
    fn single_value_helper() {
        assert_eq!(single("m", vec![Token::Bool(true)]), Ok(Token::Bool(true)));
        assert!(single("m", vec![]).is_err());
        assert!(single("m", vec![Token::Bool(true), Token::Bool(false)]).is_err());
    }
}
