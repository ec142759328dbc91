//! Contract events, decoded once at the ledger boundary.

use fhe_quest_protocol::{Address, RawLog, Token, Wei};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::error::LedgerError;

/// The five event shapes emitted by the treasure-hunt contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ContractEvent {
    AttemptMade { game_id: u64, player: Address, is_correct: bool },
    TreasureFound { game_id: u64, winner: Address, x: u32, y: u32, amount: Wei },
    GameCompleted { game_id: u64, winner: Address, total_revenue: Wei },
    DecryptionCompleted { game_id: u64, player: Address, is_correct: bool },
    WrongAttemptRecorded { player: Address, game_id: u64 },
}

fn arg<'a>(log: &'a RawLog, index: usize) -> Result<&'a Token, LedgerError> {
    log.args.get(index).ok_or_else(|| {
        LedgerError::Decode(format!("{} is missing argument {index}", log.name))
    })
}

fn small_uint(token: &Token) -> Result<u32, LedgerError> {
    let value = token.as_uint()?;
    u32::try_from(value).map_err(|_| LedgerError::Decode(format!("{value} is not a u32")))
}

impl ContractEvent {
    /// Decodes a raw log. Logs with names this client does not consume
    /// decode to `None`.
    pub fn decode(log: &RawLog) -> Result<Option<Self>, LedgerError> {
        let event = match log.name.as_str() {
            "AttemptMade" => ContractEvent::AttemptMade {
                game_id: arg(log, 0)?.as_u64()?,
                player: arg(log, 1)?.as_address()?.clone(),
                is_correct: arg(log, 2)?.as_bool()?,
            },
            "TreasureFound" => ContractEvent::TreasureFound {
                game_id: arg(log, 0)?.as_u64()?,
                winner: arg(log, 1)?.as_address()?.clone(),
                x: small_uint(arg(log, 2)?)?,
                y: small_uint(arg(log, 3)?)?,
                amount: Wei(arg(log, 4)?.as_uint()?),
            },
            "GameCompleted" => ContractEvent::GameCompleted {
                game_id: arg(log, 0)?.as_u64()?,
                winner: arg(log, 1)?.as_address()?.clone(),
                total_revenue: Wei(arg(log, 2)?.as_uint()?),
            },
            "DecryptionCompleted" => ContractEvent::DecryptionCompleted {
                game_id: arg(log, 0)?.as_u64()?,
                player: arg(log, 1)?.as_address()?.clone(),
                is_correct: arg(log, 2)?.as_bool()?,
            },
            "WrongAttemptRecorded" => ContractEvent::WrongAttemptRecorded {
                player: arg(log, 0)?.as_address()?.clone(),
                game_id: arg(log, 1)?.as_u64()?,
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// The account the event is about: the player, or the winner.
    pub fn subject(&self) -> &Address {
        match self {
            ContractEvent::AttemptMade { player, .. }
            | ContractEvent::DecryptionCompleted { player, .. }
            | ContractEvent::WrongAttemptRecorded { player, .. } => player,
            ContractEvent::TreasureFound { winner, .. }
            | ContractEvent::GameCompleted { winner, .. } => winner,
        }
    }

    pub fn game_id(&self) -> u64 {
        match self {
            ContractEvent::AttemptMade { game_id, .. }
            | ContractEvent::TreasureFound { game_id, .. }
            | ContractEvent::GameCompleted { game_id, .. }
            | ContractEvent::DecryptionCompleted { game_id, .. }
            | ContractEvent::WrongAttemptRecorded { game_id, .. } => *game_id,
        }
    }

    /// True for events after which the game no longer accepts attempts.
    pub fn ends_game(&self) -> bool {
        matches!(
            self,
            ContractEvent::TreasureFound { .. } | ContractEvent::GameCompleted { .. }
        )
    }
}

/// Ordered stream of decoded contract events for one subscriber.
pub struct EventStream {
    rx: broadcast::Receiver<RawLog>,
}

impl EventStream {
    pub fn new(rx: broadcast::Receiver<RawLog>) -> Self {
        Self { rx }
    }

    fn accept(log: RawLog) -> Option<ContractEvent> {
        match ContractEvent::decode(&log) {
            Ok(Some(event)) => Some(event),
            Ok(None) => {
                debug!(name = %log.name, "ignoring unrelated contract log");
                None
            }
            Err(err) => {
                warn!(name = %log.name, error = %err, "dropping malformed contract event");
                None
            }
        }
    }

    /// Waits for the next decodable event. `None` once the transport closes.
    pub async fn next(&mut self) -> Option<ContractEvent> {
        loop {
            match self.rx.recv().await {
                Ok(log) => {
                    if let Some(event) = Self::accept(log) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged; relying on the next refresh");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already-buffered event without waiting.
    pub fn try_next(&mut self) -> Option<ContractEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(log) => {
                    if let Some(event) = Self::accept(log) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged; relying on the next refresh");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Address {
        Address::parse("0xABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap()
    }

    fn log(name: &str, args: Vec<Token>) -> RawLog {
        RawLog { name: name.into(), args, block_number: 1 }
    }

    #[test]
    fn decodes_all_five_shapes() {
        let p = player();
        let cases = vec![
            (
                log("AttemptMade", vec![Token::Uint(1), Token::Address(p.clone()), Token::Bool(false)]),
                ContractEvent::AttemptMade { game_id: 1, player: p.clone(), is_correct: false },
            ),
            (
                log(
                    "TreasureFound",
                    vec![
                        Token::Uint(1),
                        Token::Address(p.clone()),
                        Token::Uint(3),
                        Token::Uint(4),
                        Token::Uint(10),
                    ],
                ),
                ContractEvent::TreasureFound { game_id: 1, winner: p.clone(), x: 3, y: 4, amount: Wei(10) },
            ),
            (
                log("GameCompleted", vec![Token::Uint(1), Token::Address(p.clone()), Token::Uint(5)]),
                ContractEvent::GameCompleted { game_id: 1, winner: p.clone(), total_revenue: Wei(5) },
            ),
            (
                log("DecryptionCompleted", vec![Token::Uint(2), Token::Address(p.clone()), Token::Bool(true)]),
                ContractEvent::DecryptionCompleted { game_id: 2, player: p.clone(), is_correct: true },
            ),
            (
                log("WrongAttemptRecorded", vec![Token::Address(p.clone()), Token::Uint(2)]),
                ContractEvent::WrongAttemptRecorded { player: p.clone(), game_id: 2 },
            ),
        ];
        for (raw, expected) in cases {
            assert_eq!(ContractEvent::decode(&raw).unwrap(), Some(expected));
        }
    }

    #[test]
    fn addresses_compare_case_insensitively() {
        let lower = Address::parse("0xabcdef0123456789abcdef0123456789abcdef01").unwrap();
        let event = ContractEvent::decode(&log(
            "WrongAttemptRecorded",
            vec![Token::Address(player()), Token::Uint(1)],
        ))
        .unwrap()
        .unwrap();
        assert_eq!(event.subject(), &lower);
    }

    #[test]
    fn unknown_and_malformed_logs() {
        assert_eq!(ContractEvent::decode(&log("OwnershipTransferred", vec![])).unwrap(), None);
        assert!(ContractEvent::decode(&log("AttemptMade", vec![Token::Uint(1)])).is_err());
        assert!(ContractEvent::decode(&log(
            "WrongAttemptRecorded",
            vec![Token::Uint(1), Token::Uint(1)]
        ))
        .is_err());
    }

    #[tokio::test]
    async fn stream_preserves_order_and_skips_noise() {
        let (tx, rx) = broadcast::channel(16);
        let mut stream = EventStream::new(rx);
        let p = player();
        tx.send(log("AttemptMade", vec![Token::Uint(1), Token::Address(p.clone()), Token::Bool(false)]))
            .unwrap();
        tx.send(log("Noise", vec![])).unwrap();
        tx.send(log("WrongAttemptRecorded", vec![Token::Address(p.clone()), Token::Uint(1)]))
            .unwrap();

        assert!(matches!(stream.next().await, Some(ContractEvent::AttemptMade { .. })));
        assert!(matches!(stream.try_next(), Some(ContractEvent::WrongAttemptRecorded { .. })));
        assert_eq!(stream.try_next(), None);

        drop(tx);
        assert_eq!(stream.next().await, None);
    }
}
