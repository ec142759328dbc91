//! Search attempt resolver.
//!
//! Drives one attempt from a selected cell to a terminal outcome:
//!
//! ```text
//! Idle --select--> Selected --start--> Encrypting --> Submitting
//!   --> AwaitingConfirmation --> AwaitingOracle --+--event-->  Resolved
//!                                                 +--timeout-> TimedOut
//! any pre-oracle step --error--> Failed
//! ```
//!
//! The oracle answer and the local fallback timer race. Whichever reaches
//! the resolver first settles the attempt; the attempt's single-use
//! `resolved` guard turns the other one into a no-op.
//!
//! Everything before the oracle wait runs as a chain of [`Submission`]
//! steps that the caller polls next to its other work. Each finished
//! [`Step`] goes back through [`Resolver::on_step`], which applies the
//! status change and hands out the next step. A step that finishes after
//! its attempt was cancelled changes nothing.
//!
//! The contract carries no attempt id, so an event is attributed to the
//! pending attempt when its player (or winner) is the current account and
//! an attempt is awaiting the oracle. A stale event for the same account
//! would be misattributed; the client drains buffered events before each
//! start to keep that window small.

use fhe_quest_protocol::{Address, Coordinate, Receipt, TxHash, Wei};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::encryption::{EncryptedCoordinate, EncryptionOracle};
use crate::error::QuestError;
use crate::format::{format_address, format_ether};
use crate::grid::GridState;
use crate::ledger::{ContractEvent, ContractTransport, EventStream, PendingTx};
use crate::session::Session;
use crate::store::SessionStore;

/// Lifecycle of one attempt. Variants are declared in transition order and
/// an attempt only ever moves to a greater status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttemptStatus {
    Encrypting,
    Submitting,
    AwaitingConfirmation,
    AwaitingOracle,
    Resolved,
    TimedOut,
    Failed,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptStatus::Resolved | AttemptStatus::TimedOut | AttemptStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    WrongAttempt,
    TreasureFound,
    GameCompleted,
}

/// Where an outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Decoded from a contract event.
    OracleEvent,
    /// Synthesized when the fallback timer fired first. Not confirmed
    /// on-chain; a late event could contradict it.
    FallbackTimeout,
}

/// Terminal value of a resolved attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub coordinate: Coordinate,
    pub amount: Option<Wei>,
    pub winner: Option<Address>,
    pub provenance: Provenance,
}

impl Outcome {
    pub fn is_authoritative(&self) -> bool {
        self.provenance == Provenance::OracleEvent
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.amount, &self.winner) {
            (OutcomeKind::WrongAttempt, _, _) => {
                write!(f, "No treasure at {}. Try again!", self.coordinate)?;
                if !self.is_authoritative() {
                    write!(f, " (assumed: {})", QuestError::OracleTimeout)?;
                }
                Ok(())
            }
            (OutcomeKind::TreasureFound, Some(amount), _) => write!(
                f,
                "You won! Treasure found at {} - Prize: {} ETH",
                self.coordinate,
                format_ether(amount)
            ),
            (OutcomeKind::TreasureFound, None, _) => {
                write!(f, "Congratulations! You found the treasure at {}!", self.coordinate)
            }
            (OutcomeKind::GameCompleted, amount, winner) => {
                write!(f, "Game completed!")?;
                if let Some(winner) = winner {
                    write!(f, " Winner: {}", format_address(winner))?;
                }
                if let Some(revenue) = amount {
                    write!(f, " - Total Revenue: {} ETH", format_ether(revenue))?;
                }
                Ok(())
            }
        }
    }
}

/// One search attempt by the current account.
#[derive(Debug, Clone)]
pub struct SearchAttempt {
    player: Address,
    coordinate: Coordinate,
    fee: Wei,
    encrypted: Option<EncryptedCoordinate>,
    tx_hash: Option<TxHash>,
    submitted_at: Option<u64>,
    status: AttemptStatus,
    deadline: Option<Instant>,
    resolved: bool,
    outcome: Option<Outcome>,
    error: Option<QuestError>,
}

impl SearchAttempt {
    fn new(player: Address, coordinate: Coordinate, fee: Wei) -> Self {
        Self {
            player,
            coordinate,
            fee,
            encrypted: None,
            tx_hash: None,
            submitted_at: None,
            status: AttemptStatus::Encrypting,
            deadline: None,
            resolved: false,
            outcome: None,
            error: None,
        }
    }

    fn advance(&mut self, next: AttemptStatus) {
        debug_assert!(next > self.status, "attempt status moved backwards");
        if next <= self.status {
            error!(from = ?self.status, to = ?next, "refusing backward attempt transition");
            return;
        }
        debug!(coordinate = %self.coordinate, from = ?self.status, to = ?next, "attempt status");
        self.status = next;
    }

    /// Sets the single-use guard. Returns false if it was already set.
    fn claim_resolution(&mut self) -> bool {
        !std::mem::replace(&mut self.resolved, true)
    }

    pub fn player(&self) -> &Address {
        &self.player
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn encrypted(&self) -> Option<&EncryptedCoordinate> {
        self.encrypted.as_ref()
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        self.tx_hash
    }

    /// Unix time at which the submission was confirmed.
    pub fn submitted_at(&self) -> Option<u64> {
        self.submitted_at
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn error(&self) -> Option<&QuestError> {
        self.error.as_ref()
    }
}

/// Coarse state for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolverState {
    Idle,
    Selected(Coordinate),
    InFlight(AttemptStatus),
}

/// A finished step of the submission pipeline.
pub enum Step<C> {
    Checked(Result<bool, QuestError>),
    Encrypted(Result<EncryptedCoordinate, QuestError>),
    Broadcast(Result<PendingTx<C>, QuestError>),
    Confirmed(Result<Receipt, QuestError>),
}

/// The step currently running. Owns clones of whatever it needs from the
/// session, so it can be polled next to other work and dropped at any time.
pub struct Submission<C> {
    step: Pin<Box<dyn Future<Output = Step<C>> + Send>>,
}

impl<C> Submission<C> {
    fn new(step: impl Future<Output = Step<C>> + Send + 'static) -> Self {
        Self { step: Box::pin(step) }
    }
}

impl<C> Future for Submission<C> {
    type Output = Step<C>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Step<C>> {
        self.step.as_mut().poll(cx)
    }
}

/// A start that passed the local checks and is waiting on the on-chain
/// pending-decryption check.
#[derive(Debug, Clone, Copy)]
struct Preflight {
    coordinate: Coordinate,
    fee: Wei,
}

pub struct Resolver {
    fallback: Duration,
    selected: Option<Coordinate>,
    preflight: Option<Preflight>,
    current: Option<SearchAttempt>,
    grid: GridState,
}

impl Resolver {
    pub fn new(fallback: Duration) -> Self {
        Self { fallback, selected: None, preflight: None, current: None, grid: GridState::new() }
    }

    pub fn state(&self) -> ResolverState {
        match (&self.current, self.selected) {
            (Some(attempt), _) if !attempt.status.is_terminal() => {
                ResolverState::InFlight(attempt.status)
            }
            (_, Some(coordinate)) => ResolverState::Selected(coordinate),
            _ => ResolverState::Idle,
        }
    }

    /// Busy means an attempt exists and is not terminal.
    pub fn is_busy(&self) -> bool {
        self.preflight.is_some() || self.current.as_ref().is_some_and(|a| !a.status.is_terminal())
    }

    pub fn selected(&self) -> Option<Coordinate> {
        self.selected
    }

    /// The attempt in flight, or the last one that finished.
    pub fn attempt(&self) -> Option<&SearchAttempt> {
        self.current.as_ref()
    }

    pub fn grid(&self) -> &GridState {
        &self.grid
    }

    pub(crate) fn grid_mut(&mut self) -> &mut GridState {
        &mut self.grid
    }

    pub fn fallback_deadline(&self) -> Option<Instant> {
        self.current
            .as_ref()
            .filter(|a| a.status == AttemptStatus::AwaitingOracle)
            .and_then(|a| a.deadline)
    }

    pub fn select(&mut self, coordinate: Coordinate, store: &SessionStore) -> Result<(), QuestError> {
        if self.is_busy() {
            return Err(QuestError::AttemptAlreadyPending);
        }
        if !store.is_active() {
            return Err(QuestError::GameInactive);
        }
        debug!(%coordinate, "cell selected");
        self.selected = Some(coordinate);
        Ok(())
    }

    /// Checks the preconditions and returns the first step of the
    /// submission pipeline. The caller polls it and feeds each finished
    /// [`Step`] back through [`Resolver::on_step`].
    ///
    /// Precondition failures (`AttemptAlreadyPending`, `NoCoordinateSelected`,
    /// `GameInactive`) leave the resolver untouched. Dropping the returned
    /// [`Submission`] abandons the step; pair it with [`Resolver::cancel`].
    pub fn start<C, O>(
        &mut self,
        session: &Session<C, O>,
        store: &SessionStore,
    ) -> Result<Submission<C>, QuestError>
    where
        C: ContractTransport,
        O: EncryptionOracle,
    {
        if self.is_busy() {
            return Err(QuestError::AttemptAlreadyPending);
        }
        let coordinate = self.selected.ok_or(QuestError::NoCoordinateSelected)?;
        if !store.is_active() {
            return Err(QuestError::GameInactive);
        }

        self.preflight = Some(Preflight { coordinate, fee: store.attempt_fee() });
        let ledger = session.ledger().clone();
        Ok(Submission::new(async move { Step::Checked(ledger.is_decryption_pending().await) }))
    }

    /// Applies a finished step. Returns the next step to poll, `None` once
    /// the attempt is awaiting the oracle, or the error that ended it.
    pub fn on_step<C, O>(
        &mut self,
        step: Step<C>,
        session: &Session<C, O>,
    ) -> Result<Option<Submission<C>>, QuestError>
    where
        C: ContractTransport,
        O: EncryptionOracle,
    {
        match step {
            Step::Checked(pending) => {
                let Some(Preflight { coordinate, fee }) = self.preflight.take() else {
                    debug!("pending-decryption check finished after cancel; ignored");
                    return Ok(None);
                };
                match pending {
                    Ok(true) => {
                        info!(%coordinate, "decryption still pending on-chain; start rejected");
                        return Err(QuestError::AttemptAlreadyPending);
                    }
                    Ok(false) => {}
                    Err(err) => warn!(error = %err, "could not check pending decryption; continuing"),
                }

                info!(%coordinate, account = %session.account(), "search attempt started");
                self.current = Some(SearchAttempt::new(session.account().clone(), coordinate, fee));
                let gateway = session.gateway().clone();
                let contract = session.contract().clone();
                let player = session.account().clone();
                Ok(Some(Submission::new(async move {
                    Step::Encrypted(gateway.encrypt_coordinate(&contract, &player, coordinate).await)
                })))
            }
            Step::Encrypted(encrypted) => {
                let Some(attempt) = self.in_step(AttemptStatus::Encrypting) else {
                    return Ok(None);
                };
                let encrypted = match encrypted {
                    Ok(encrypted) => encrypted,
                    Err(err) => return Err(self.fail(err)),
                };
                attempt.encrypted = Some(encrypted.clone());
                attempt.advance(AttemptStatus::Submitting);
                let fee = attempt.fee;
                let ledger = session.ledger().clone();
                Ok(Some(Submission::new(async move {
                    Step::Broadcast(ledger.submit_search(&encrypted, fee).await)
                })))
            }
            Step::Broadcast(pending) => {
                let Some(attempt) = self.in_step(AttemptStatus::Submitting) else {
                    return Ok(None);
                };
                let pending = match pending {
                    Ok(pending) => pending,
                    Err(err) => return Err(self.fail(err)),
                };
                attempt.tx_hash = Some(pending.hash());
                attempt.advance(AttemptStatus::AwaitingConfirmation);
                Ok(Some(Submission::new(async move {
                    Step::Confirmed(pending.await_confirmation().await)
                })))
            }
            Step::Confirmed(receipt) => {
                let fallback = self.fallback;
                let Some(attempt) = self.in_step(AttemptStatus::AwaitingConfirmation) else {
                    return Ok(None);
                };
                if let Err(err) = receipt {
                    return Err(self.fail(err));
                }
                attempt.submitted_at = Some(crate::unix_now());
                attempt.deadline = Some(Instant::now() + fallback);
                attempt.advance(AttemptStatus::AwaitingOracle);
                info!(
                    coordinate = %attempt.coordinate,
                    fallback_ms = fallback.as_millis() as u64,
                    "submission confirmed; awaiting oracle"
                );
                Ok(None)
            }
        }
    }

    /// Drives a submission to the oracle wait without anything else
    /// competing for the resolver.
    pub async fn submit<C, O>(
        &mut self,
        mut submission: Submission<C>,
        session: &Session<C, O>,
    ) -> Result<(), QuestError>
    where
        C: ContractTransport,
        O: EncryptionOracle,
    {
        loop {
            let step = (&mut submission).await;
            match self.on_step(step, session)? {
                Some(next) => submission = next,
                None => return Ok(()),
            }
        }
    }

    /// The current attempt, if it is still at `status`.
    fn in_step(&mut self, status: AttemptStatus) -> Option<&mut SearchAttempt> {
        let attempt = self.current.as_mut().filter(|a| a.status == status);
        if attempt.is_none() {
            debug!(expected = ?status, "stale submission step ignored");
        }
        attempt
    }

    fn fail(&mut self, err: QuestError) -> QuestError {
        if let Some(attempt) = self.current.as_mut() {
            warn!(coordinate = %attempt.coordinate, error = %err, "search attempt failed");
            attempt.error = Some(err.clone());
            attempt.deadline = None;
            attempt.advance(AttemptStatus::Failed);
        }
        err
    }

    /// Feeds a contract event. Returns the outcome if the event settled the
    /// pending attempt.
    pub fn on_event(
        &mut self,
        event: &ContractEvent,
        account: &Address,
        store: &mut SessionStore,
    ) -> Option<Outcome> {
        let attempt = self.current.as_ref()?;
        if attempt.status != AttemptStatus::AwaitingOracle || event.subject() != account {
            return None;
        }
        let coordinate = attempt.coordinate;

        let (kind, coordinate, amount, winner) = match event {
            ContractEvent::AttemptMade { is_correct, .. }
            | ContractEvent::DecryptionCompleted { is_correct, .. } => {
                if *is_correct {
                    (OutcomeKind::TreasureFound, coordinate, None, Some(account.clone()))
                } else {
                    (OutcomeKind::WrongAttempt, coordinate, None, None)
                }
            }
            ContractEvent::WrongAttemptRecorded { .. } => {
                (OutcomeKind::WrongAttempt, coordinate, None, None)
            }
            ContractEvent::TreasureFound { winner, x, y, amount, .. } => {
                let found = Coordinate::new(*x, *y).unwrap_or(coordinate);
                (OutcomeKind::TreasureFound, found, Some(*amount), Some(winner.clone()))
            }
            ContractEvent::GameCompleted { winner, total_revenue, .. } => {
                (OutcomeKind::GameCompleted, coordinate, Some(*total_revenue), Some(winner.clone()))
            }
        };

        let outcome = Outcome { kind, coordinate, amount, winner, provenance: Provenance::OracleEvent };
        self.finish(outcome, AttemptStatus::Resolved, store)
    }

    /// Fallback timer expiry. Assumes a miss; see [`Provenance::FallbackTimeout`].
    pub fn on_fallback(&mut self, store: &mut SessionStore) -> Option<Outcome> {
        let attempt = self.current.as_ref()?;
        if attempt.status != AttemptStatus::AwaitingOracle {
            return None;
        }
        warn!(coordinate = %attempt.coordinate, notice = %QuestError::OracleTimeout, "fallback fired");
        let outcome = Outcome {
            kind: OutcomeKind::WrongAttempt,
            coordinate: attempt.coordinate,
            amount: None,
            winner: None,
            provenance: Provenance::FallbackTimeout,
        };
        self.finish(outcome, AttemptStatus::TimedOut, store)
    }

    fn finish(
        &mut self,
        outcome: Outcome,
        status: AttemptStatus,
        store: &mut SessionStore,
    ) -> Option<Outcome> {
        let attempt = self.current.as_mut()?;
        if !attempt.claim_resolution() {
            debug!(coordinate = %attempt.coordinate, "attempt already resolved; trigger ignored");
            return None;
        }
        attempt.deadline = None;
        attempt.advance(status);
        attempt.outcome = Some(outcome.clone());

        match outcome.kind {
            OutcomeKind::WrongAttempt => {
                self.grid.mark_wrong(attempt.coordinate);
                store.note_wrong_attempt();
            }
            OutcomeKind::TreasureFound | OutcomeKind::GameCompleted => store.mark_inactive(),
        }
        self.selected = None;

        info!(
            kind = ?outcome.kind,
            coordinate = %outcome.coordinate,
            provenance = ?outcome.provenance,
            "attempt resolved"
        );
        Some(outcome)
    }

    /// Abandons an in-flight attempt as `Failed(Cancelled)`.
    pub fn cancel(&mut self) -> Option<QuestError> {
        if let Some(preflight) = self.preflight.take() {
            info!(coordinate = %preflight.coordinate, "start cancelled before submission");
            return Some(QuestError::Cancelled);
        }
        let attempt = self.current.as_mut().filter(|a| !a.status.is_terminal())?;
        attempt.resolved = true;
        attempt.deadline = None;
        attempt.error = Some(QuestError::Cancelled);
        attempt.advance(AttemptStatus::Failed);
        info!(coordinate = %attempt.coordinate, "attempt cancelled");
        Some(QuestError::Cancelled)
    }

    /// Waits until the pending attempt is settled by an event or by the
    /// fallback timer. Returns `None` if nothing is awaiting the oracle.
    pub async fn await_resolution(
        &mut self,
        events: &mut EventStream,
        account: &Address,
        store: &mut SessionStore,
    ) -> Option<Outcome> {
        let deadline = self.fallback_deadline()?;
        let mut stream_open = true;
        loop {
            tokio::select! {
                event = events.next(), if stream_open => match event {
                    Some(event) => {
                        if let Some(outcome) = self.on_event(&event, account, store) {
                            return Some(outcome);
                        }
                    }
                    None => stream_open = false,
                },
                _ = tokio::time::sleep_until(deadline) => return self.on_fallback(store),
            }
        }
    }
}
