//! Single-contract devnet implementing [`ContractTransport`].
//!
//! Transactions are queued on `send` and executed when their receipt is
//! awaited, after one block time. A successful `searchTreasure` leaves a
//! decryption pending; the simulated coprocessor answers after
//! `oracle_delay_ms` (or never, when unset) by emitting the result events.

use async_trait::async_trait;
use fhe_quest_protocol::{Address, RawLog, Receipt, Token, TxHash, Wei, GRID_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::oracle::{keccak256, CipherEnvelope};
use crate::config::SEPOLIA_CHAIN_ID;
use crate::error::{LedgerError, USER_REJECTED_CODE};
use crate::ledger::{ContractTransport, TxRequest};

const SEARCH_GAS: u64 = 320_000;
const CREATE_GAS: u64 = 640_000;
const LOG_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevnetConfig {
    pub chain_id: u64,
    pub attempt_fee: Wei,
    pub initial_balance: Wei,
    pub block_time_ms: u64,
    /// `None` models a coprocessor that never calls back.
    pub oracle_delay_ms: Option<u64>,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            chain_id: SEPOLIA_CHAIN_ID,
            attempt_fee: Wei(1_000_000_000_000_000),
            initial_balance: Wei::from_ether(10),
            block_time_ms: 500,
            oracle_delay_ms: Some(2_000),
        }
    }
}

#[derive(Debug, Default)]
struct Game {
    id: u64,
    creator: Option<Address>,
    treasure_amount: Wei,
    duration_seconds: u64,
    start_time: u64,
    is_active: bool,
    is_completed: bool,
    winner: Option<Address>,
    total_attempts: u64,
    total_revenue: Wei,
    treasure: Option<(u32, u32)>,
}

#[derive(Debug, Clone)]
struct PendingDecryption {
    player: Address,
    guess: (u32, u32),
}

#[derive(Debug)]
struct Chain {
    owner: Address,
    contract: Address,
    attempt_fee: Wei,
    initial_balance: Wei,
    balances: HashMap<Address, Wei>,
    wrong_attempts: HashMap<Address, u64>,
    game: Game,
    pending: Option<PendingDecryption>,
    queued: HashMap<TxHash, TxRequest>,
    receipts: HashMap<TxHash, Receipt>,
    block: u64,
    nonce: u64,
    reject_next: bool,
}

/// Why a transaction reverted.
struct Revert(String);

fn revert<T>(reason: &str) -> Result<T, Revert> {
    Err(Revert(reason.to_string()))
}

impl Chain {
    fn balance(&self, account: &Address) -> Wei {
        self.balances.get(account).copied().unwrap_or(self.initial_balance)
    }

    fn debit(&mut self, account: &Address, amount: Wei) -> Result<(), Revert> {
        let Some(left) = self.balance(account).checked_sub(amount) else {
            return revert("insufficient balance");
        };
        self.balances.insert(account.clone(), left);
        Ok(())
    }

    fn credit(&mut self, account: &Address, amount: Wei) {
        let next = self.balance(account).saturating_add(amount);
        self.balances.insert(account.clone(), next);
    }

    fn accepting(&self, now: u64) -> bool {
        self.game.is_active
            && !self.game.is_completed
            && now < self.game.start_time.saturating_add(self.game.duration_seconds)
    }

    fn log(&self, name: &str, args: Vec<Token>) -> RawLog {
        RawLog { name: name.into(), args, block_number: self.block }
    }

    fn read_coordinate(&self, args: &[Token], from: usize, sender: &Address) -> Result<(u32, u32), Revert> {
        let mut out = [0u32; 2];
        for (axis, slot) in out.iter_mut().enumerate() {
            let handle = args.get(from + axis).and_then(|t| t.as_bytes().ok());
            let proof = args.get(from + 2 + axis).and_then(|t| t.as_bytes().ok());
            let (Some(handle), Some(proof)) = (handle, proof) else {
                return revert("missing encrypted input");
            };
            let envelope = CipherEnvelope::open(handle.as_bytes(), proof.as_bytes())
                .map_err(|e| Revert(format!("invalid input proof: {e}")))?;
            if !envelope.is_bound_to(&self.contract, sender) {
                return revert("input proof not bound to sender");
            }
            *slot = envelope.values.first().copied().unwrap_or(u32::MAX);
        }
        Ok((out[0], out[1]))
    }

    fn execute(&mut self, request: &TxRequest, now: u64) -> Result<u64, Revert> {
        match request.method {
            "searchTreasure" => self.search(request, now),
            "createGame" => self.create(request, now),
            other => Err(Revert(format!("unknown method {other}"))),
        }
    }

    fn search(&mut self, request: &TxRequest, now: u64) -> Result<u64, Revert> {
        if request.gas_limit < SEARCH_GAS {
            return revert("out of gas");
        }
        if !self.accepting(now) {
            return revert("game is not active");
        }
        if self.pending.is_some() {
            return revert("decryption pending");
        }
        if request.value < self.attempt_fee {
            return revert("insufficient attempt fee");
        }
        let guess = self.read_coordinate(&request.args, 0, &request.from)?;
        self.debit(&request.from, request.value)?;
        self.game.total_attempts += 1;
        self.game.total_revenue = self.game.total_revenue.saturating_add(request.value);
        self.pending = Some(PendingDecryption { player: request.from.clone(), guess });
        Ok(SEARCH_GAS)
    }

    fn create(&mut self, request: &TxRequest, now: u64) -> Result<u64, Revert> {
        if request.gas_limit < CREATE_GAS {
            return revert("out of gas");
        }
        if request.from != self.owner {
            return revert("only owner can create games");
        }
        if self.accepting(now) {
            return revert("a game is already active");
        }
        let uint = |i: usize| request.args.get(i).and_then(|t| t.as_uint().ok());
        let (Some(treasure), Some(duration)) = (uint(0), uint(1)) else {
            return revert("missing game parameters");
        };
        if request.value.0 != treasure || treasure == 0 {
            return revert("treasure value mismatch");
        }
        let Ok(duration) = u64::try_from(duration) else {
            return revert("duration out of range");
        };
        let (x, y) = self.read_coordinate(&request.args, 2, &request.from)?;
        if x >= GRID_SIZE as u32 || y >= GRID_SIZE as u32 {
            return revert("treasure outside the grid");
        }
        self.debit(&request.from, request.value)?;

        self.game = Game {
            id: self.game.id + 1,
            creator: Some(request.from.clone()),
            treasure_amount: Wei(treasure),
            duration_seconds: duration,
            start_time: now,
            is_active: true,
            treasure: Some((x, y)),
            ..Game::default()
        };
        self.wrong_attempts.clear();
        self.pending = None;
        Ok(CREATE_GAS)
    }

    /// Completes the pending decryption and returns the logs it emits.
    fn fulfil(&mut self) -> Vec<RawLog> {
        let Some(PendingDecryption { player, guess }) = self.pending.take() else {
            return Vec::new();
        };
        self.block += 1;
        let id = Token::Uint(self.game.id as u128);
        let who = Token::Address(player.clone());

        if self.game.treasure == Some(guess) && !self.game.is_completed {
            let prize = self.game.treasure_amount;
            self.credit(&player, prize);
            self.game.is_completed = true;
            self.game.is_active = false;
            self.game.winner = Some(player.clone());
            vec![
                self.log(
                    "TreasureFound",
                    vec![
                        id.clone(),
                        who.clone(),
                        Token::Uint(guess.0 as u128),
                        Token::Uint(guess.1 as u128),
                        Token::Uint(prize.0),
                    ],
                ),
                self.log(
                    "GameCompleted",
                    vec![id.clone(), who.clone(), Token::Uint(self.game.total_revenue.0)],
                ),
                self.log("AttemptMade", vec![id.clone(), who.clone(), Token::Bool(true)]),
                self.log("DecryptionCompleted", vec![id, who, Token::Bool(true)]),
            ]
        } else {
            *self.wrong_attempts.entry(player.clone()).or_default() += 1;
            vec![
                self.log("AttemptMade", vec![id.clone(), who.clone(), Token::Bool(false)]),
                self.log("DecryptionCompleted", vec![id.clone(), who.clone(), Token::Bool(false)]),
                self.log("WrongAttemptRecorded", vec![who, id]),
            ]
        }
    }
}

/// In-process chain hosting one treasure-hunt contract.
#[derive(Clone)]
pub struct Devnet {
    chain: Arc<Mutex<Chain>>,
    logs: broadcast::Sender<RawLog>,
    block_time: Duration,
    oracle_delay: Arc<Mutex<Option<Duration>>>,
}

impl Devnet {
    pub fn new(config: &DevnetConfig, owner: Address, contract: Address) -> Self {
        let (logs, _) = broadcast::channel(LOG_CAPACITY);
        let chain = Chain {
            owner,
            contract,
            attempt_fee: config.attempt_fee,
            initial_balance: config.initial_balance,
            balances: HashMap::new(),
            wrong_attempts: HashMap::new(),
            game: Game::default(),
            pending: None,
            queued: HashMap::new(),
            receipts: HashMap::new(),
            block: 1,
            nonce: 0,
            reject_next: false,
        };
        Self {
            chain: Arc::new(Mutex::new(chain)),
            logs,
            block_time: Duration::from_millis(config.block_time_ms),
            oracle_delay: Arc::new(Mutex::new(config.oracle_delay_ms.map(Duration::from_millis))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Chain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn balance(&self, account: &Address) -> Wei {
        self.lock().balance(account)
    }

    pub fn set_balance(&self, account: &Address, amount: Wei) {
        self.lock().balances.insert(account.clone(), amount);
    }

    pub fn set_oracle_delay(&self, delay: Option<Duration>) {
        *self.oracle_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// The next `send` fails as if the user dismissed the wallet prompt.
    pub fn reject_next_send(&self) {
        self.lock().reject_next = true;
    }

    pub fn is_decryption_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Runs the coprocessor callback now. Returns false if nothing was pending.
    pub fn fulfil_pending(&self) -> bool {
        let logs = self.lock().fulfil();
        let fulfilled = !logs.is_empty();
        self.publish(logs);
        fulfilled
    }

    /// Broadcasts an arbitrary log, as another contract client would cause.
    pub fn emit(&self, log: RawLog) {
        self.publish(vec![log]);
    }

    fn publish(&self, logs: Vec<RawLog>) {
        for log in logs {
            debug!(name = %log.name, block = log.block_number, "devnet log");
            // No subscribers is not an error.
            let _ = self.logs.send(log);
        }
    }

    fn schedule_callback(&self) {
        let Some(delay) = *self.oracle_delay.lock().unwrap_or_else(PoisonError::into_inner) else {
            info!("coprocessor callback disabled; decryption stays pending");
            return;
        };
        let devnet = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if devnet.fulfil_pending() {
                debug!(delay_ms = delay.as_millis() as u64, "coprocessor callback delivered");
            }
        });
    }
}

fn game_tokens(game: &Game) -> Vec<Token> {
    vec![
        Token::Uint(game.id as u128),
        Token::Address(game.creator.clone().unwrap_or_else(Address::zero)),
        Token::Uint(game.treasure_amount.0),
        Token::Uint(game.duration_seconds as u128),
        Token::Uint(game.start_time as u128),
        Token::Bool(game.is_active),
        Token::Bool(game.is_completed),
        Token::Address(game.winner.clone().unwrap_or_else(Address::zero)),
        Token::Uint(game.total_attempts as u128),
        Token::Uint(game.total_revenue.0),
    ]
}

#[async_trait]
impl ContractTransport for Devnet {
    async fn call(
        &self,
        _from: &Address,
        method: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>, LedgerError> {
        let chain = self.lock();
        let tokens = match method {
            "getGameStats" => game_tokens(&chain.game),
            "getPlayerStats" => {
                let player = args
                    .first()
                    .ok_or_else(|| LedgerError::CallException { reason: "missing player".into() })?
                    .as_address()?;
                let wrong = chain.wrong_attempts.get(player).copied().unwrap_or(0);
                vec![Token::Uint(wrong as u128)]
            }
            "getAttemptFee" => vec![Token::Uint(chain.attempt_fee.0)],
            "owner" => vec![Token::Address(chain.owner.clone())],
            "isDecryptionPending" => vec![Token::Bool(chain.pending.is_some())],
            other => {
                return Err(LedgerError::CallException { reason: format!("unknown method {other}") })
            }
        };
        Ok(tokens)
    }

    async fn send(&self, request: TxRequest) -> Result<TxHash, LedgerError> {
        let mut chain = self.lock();
        if std::mem::take(&mut chain.reject_next) {
            return Err(LedgerError::Provider {
                code: Some(USER_REJECTED_CODE),
                message: "user rejected transaction".into(),
            });
        }
        if chain.balance(&request.from) < request.value {
            return Err(LedgerError::InsufficientFunds);
        }
        chain.nonce += 1;
        let preimage = bincode::serialize(&(request.from.to_bytes(), request.method, chain.nonce))
            .map_err(|e| LedgerError::Provider { code: None, message: e.to_string() })?;
        let hash = TxHash(keccak256(&preimage));
        chain.queued.insert(hash, request);
        Ok(hash)
    }

    async fn wait_receipt(&self, tx: TxHash) -> Result<Receipt, LedgerError> {
        let mined = self.lock().receipts.get(&tx).cloned();
        if let Some(receipt) = mined {
            return Ok(receipt);
        }
        tokio::time::sleep(self.block_time).await;

        let (receipt, schedule) = {
            let mut chain = self.lock();
            if let Some(receipt) = chain.receipts.get(&tx) {
                return Ok(receipt.clone());
            }
            let request = chain.queued.remove(&tx).ok_or_else(|| LedgerError::Provider {
                code: None,
                message: format!("unknown transaction {tx}"),
            })?;
            chain.block += 1;
            let now = crate::unix_now();
            let result = chain.execute(&request, now);
            let receipt = match &result {
                Ok(gas_used) => Receipt {
                    tx_hash: tx,
                    status: 1,
                    block_number: chain.block,
                    gas_used: *gas_used,
                    revert_reason: None,
                },
                Err(Revert(reason)) => {
                    warn!(method = request.method, %reason, "devnet transaction reverted");
                    Receipt {
                        tx_hash: tx,
                        status: 0,
                        block_number: chain.block,
                        gas_used: request.gas_limit,
                        revert_reason: Some(reason.clone()),
                    }
                }
            };
            chain.receipts.insert(tx, receipt.clone());
            (receipt, result.is_ok() && request.method == "searchTreasure")
        };

        if schedule {
            self.schedule_callback();
        }
        Ok(receipt)
    }

    fn subscribe(&self) -> broadcast::Receiver<RawLog> {
        self.logs.subscribe()
    }
}
