//! The client event loop.
//!
//! One task owns everything derived from the current [`Session`]: the event
//! subscription, the resolver (with its grid), the running submission step,
//! the store and the creator flow. Commands, contract events, submission
//! steps, the fallback deadline, the countdown tick and the safety-net
//! refresh are multiplexed with `tokio::select!`, so handlers never
//! interleave and none of them waits on the network for an attempt.
//! Switching sessions replaces all of it in one assignment; nothing from the
//! old session can touch the new one.

use fhe_quest_protocol::{Address, Coordinate, Receipt, Wei};
use std::future::pending;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::QuestConfig;
use crate::creator::CreatorFlow;
use crate::encryption::EncryptionOracle;
use crate::error::QuestError;
use crate::grid::GridState;
use crate::ledger::{ContractEvent, ContractTransport, EventStream};
use crate::resolver::{Outcome, Resolver, ResolverState, Step, Submission};
use crate::session::Session;
use crate::store::{SessionStore, StoreSnapshot};

pub enum Command<C, O> {
    Select(Coordinate),
    Start,
    Cancel,
    EncryptTreasure(Coordinate),
    CreateGame { treasure: Wei, duration_seconds: u64 },
    Refresh,
    /// Replaces the current session, e.g. after an account or chain change.
    SwitchSession(Session<C, O>),
    Disconnect,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Connected { account: Address, chain_id: u64 },
    Disconnected,
    State(ResolverState),
    Resolved(Outcome),
    Grid(GridState),
    Failed(QuestError),
    Snapshot(StoreSnapshot),
    Countdown { remaining_seconds: u64 },
    TreasureEncrypted,
    GameCreated(Receipt),
    /// A game-ending event that was not the current account's attempt.
    GameEnded(ContractEvent),
}

struct SessionState<C, O> {
    session: Session<C, O>,
    events: EventStream,
    events_open: bool,
    resolver: Resolver,
    submission: Option<Submission<C>>,
    store: SessionStore,
    creator: CreatorFlow,
}

pub struct QuestClient<C, O> {
    config: QuestConfig,
    state: Option<SessionState<C, O>>,
}

/// Whatever the current session produced next.
enum Activity<C> {
    Event(Option<ContractEvent>),
    Step(Step<C>),
}

async fn next_activity<C, O>(state: &mut Option<SessionState<C, O>>) -> Activity<C> {
    let Some(s) = state.as_mut() else {
        return pending().await;
    };
    let events_open = s.events_open;
    let events = &mut s.events;
    let submission = &mut s.submission;
    tokio::select! {
        event = events.next(), if events_open => Activity::Event(event),
        step = async {
            match submission.as_mut() {
                Some(submission) => submission.await,
                None => pending().await,
            }
        } => Activity::Step(step),
    }
}

async fn fallback_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

impl<C: ContractTransport, O: EncryptionOracle> QuestClient<C, O> {
    pub fn new(config: QuestConfig) -> Self {
        Self { config, state: None }
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_some()
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command<C, O>>,
        updates: mpsc::Sender<Update>,
    ) {
        let mut countdown = tokio::time::interval(self.config.countdown_tick());
        countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut refresh = tokio::time::interval(self.config.refresh_interval());
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Both intervals fire immediately; consume that first tick.
        countdown.tick().await;
        refresh.tick().await;

        info!("client loop started");
        loop {
            let deadline = self.state.as_ref().and_then(|s| s.resolver.fallback_deadline());
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.on_command(command, &updates).await,
                },
                activity = next_activity(&mut self.state) => match activity {
                    Activity::Step(step) => self.on_step(step, &updates).await,
                    Activity::Event(Some(event)) => self.on_contract_event(event, &updates).await,
                    Activity::Event(None) => {
                        if let Some(state) = self.state.as_mut() {
                            warn!("contract event stream closed; relying on refresh");
                            state.events_open = false;
                        }
                    }
                },
                _ = fallback_due(deadline) => self.on_fallback(&updates).await,
                _ = countdown.tick() => self.on_tick(&updates).await,
                _ = refresh.tick() => self.on_refresh_interval(&updates).await,
            }
        }
        info!("client loop stopped");
    }

    async fn on_command(&mut self, command: Command<C, O>, updates: &mpsc::Sender<Update>) {
        let result = match command {
            Command::SwitchSession(session) => self.connect(session, updates).await,
            Command::Disconnect => {
                self.disconnect();
                emit(updates, Update::Disconnected).await;
                Ok(())
            }
            Command::Shutdown => Ok(()),
            command => self.on_session_command(command, updates).await,
        };
        if let Err(err) = result {
            emit(updates, Update::Failed(err)).await;
        }
    }

    async fn on_session_command(
        &mut self,
        command: Command<C, O>,
        updates: &mpsc::Sender<Update>,
    ) -> Result<(), QuestError> {
        if self.state.is_none() {
            return Err(QuestError::NotConnected);
        }

        match command {
            Command::Select(coordinate) => {
                let state = self.state_mut()?;
                state.resolver.select(coordinate, &state.store)?;
                emit(updates, Update::State(state.resolver.state())).await;
            }
            Command::Start => {
                self.drain_buffered_events(updates).await;
                let state = self.state_mut()?;
                let submission = state.resolver.start(&state.session, &state.store)?;
                state.submission = Some(submission);
            }
            Command::Cancel => {
                let state = self.state_mut()?;
                state.submission = None;
                if let Some(err) = state.resolver.cancel() {
                    emit(updates, Update::Failed(err)).await;
                }
                emit(updates, Update::State(state.resolver.state())).await;
            }
            Command::EncryptTreasure(coordinate) => {
                let state = self.state_mut()?;
                state.creator.encrypt_treasure(&state.session, coordinate).await?;
                emit(updates, Update::TreasureEncrypted).await;
            }
            Command::CreateGame { treasure, duration_seconds } => {
                let state = self.state_mut()?;
                let receipt = state
                    .creator
                    .create_game(
                        &state.session,
                        &mut state.store,
                        state.resolver.grid_mut(),
                        treasure,
                        duration_seconds,
                    )
                    .await?;
                emit(updates, Update::GameCreated(receipt)).await;
                emit(updates, Update::Snapshot(state.store.snapshot())).await;
            }
            Command::Refresh => self.refresh(updates).await?,
            Command::SwitchSession(_) | Command::Disconnect | Command::Shutdown => {}
        }
        Ok(())
    }

    fn state_mut(&mut self) -> Result<&mut SessionState<C, O>, QuestError> {
        self.state.as_mut().ok_or(QuestError::NotConnected)
    }

    /// Installs a new session. Whatever the old one had in flight is
    /// cancelled and dropped along with it.
    async fn connect(
        &mut self,
        session: Session<C, O>,
        updates: &mpsc::Sender<Update>,
    ) -> Result<(), QuestError> {
        self.disconnect();
        let account = session.account().clone();
        let chain_id = session.chain_id();

        let events = session.ledger().subscribe();
        self.state = Some(SessionState {
            session,
            events,
            events_open: true,
            resolver: Resolver::new(self.config.fallback_timeout()),
            submission: None,
            store: SessionStore::new(),
            creator: CreatorFlow::new(),
        });
        info!(%account, chain_id, "session installed");
        emit(updates, Update::Connected { account, chain_id }).await;
        self.refresh(updates).await
    }

    /// Drops the session together with its running submission step.
    fn disconnect(&mut self) {
        if let Some(mut old) = self.state.take() {
            if old.resolver.cancel().is_some() {
                info!(account = %old.session.account(), "in-flight attempt dropped with its session");
            }
        }
    }

    async fn refresh(&mut self, updates: &mpsc::Sender<Update>) -> Result<(), QuestError> {
        let state = self.state_mut()?;
        state
            .store
            .refresh(state.session.ledger(), state.resolver.grid_mut(), crate::unix_now())
            .await?;
        emit(updates, Update::Snapshot(state.store.snapshot())).await;
        Ok(())
    }

    /// Handles events that arrived while nothing was awaiting the oracle,
    /// so they cannot be taken for the next attempt's answer.
    async fn drain_buffered_events(&mut self, updates: &mpsc::Sender<Update>) {
        loop {
            let Some(event) = self.state.as_mut().and_then(|s| s.events.try_next()) else {
                return;
            };
            debug!(?event, "draining buffered event before start");
            self.on_contract_event(event, updates).await;
        }
    }

    async fn on_contract_event(&mut self, event: ContractEvent, updates: &mpsc::Sender<Update>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let outcome = state.resolver.on_event(&event, state.session.account(), &mut state.store);
        match outcome {
            Some(outcome) => {
                emit(updates, Update::Resolved(outcome)).await;
                emit(updates, Update::Grid(state.resolver.grid().clone())).await;
                emit(updates, Update::State(state.resolver.state())).await;
            }
            None if event.ends_game() => {
                info!(game_id = event.game_id(), winner = %event.subject(), "game ended");
                emit(updates, Update::GameEnded(event)).await;
            }
            None => return,
        }
        if let Err(err) = self.refresh(updates).await {
            warn!(error = %err, "refresh after contract event failed");
        }
    }

    async fn on_step(&mut self, step: Step<C>, updates: &mpsc::Sender<Update>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.submission = None;
        match state.resolver.on_step(step, &state.session) {
            Ok(next) => state.submission = next,
            Err(err) => emit(updates, Update::Failed(err)).await,
        }
        emit(updates, Update::State(state.resolver.state())).await;
    }

    async fn on_fallback(&mut self, updates: &mpsc::Sender<Update>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if let Some(outcome) = state.resolver.on_fallback(&mut state.store) {
            emit(updates, Update::Resolved(outcome)).await;
            emit(updates, Update::Grid(state.resolver.grid().clone())).await;
            emit(updates, Update::State(state.resolver.state())).await;
            if let Err(err) = self.refresh(updates).await {
                warn!(error = %err, "refresh after fallback failed");
            }
        }
    }

    async fn on_tick(&mut self, updates: &mpsc::Sender<Update>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if !state.store.is_active() {
            return;
        }
        let expired = state.store.tick(crate::unix_now());
        let remaining_seconds = state.store.remaining_seconds();
        emit(updates, Update::Countdown { remaining_seconds }).await;
        if expired {
            emit(updates, Update::Snapshot(state.store.snapshot())).await;
        }
    }

    async fn on_refresh_interval(&mut self, updates: &mpsc::Sender<Update>) {
        if self.state.is_none() {
            return;
        }
        if let Err(err) = self.refresh(updates).await {
            warn!(error = %err, "periodic refresh failed");
        }
    }
}

async fn emit(updates: &mpsc::Sender<Update>, update: Update) {
    if updates.send(update).await.is_err() {
        debug!("update receiver dropped");
    }
}
