//! Game session store: the client's view of the current game.
//!
//! Refreshed from the ledger on connect, after every resolved attempt and
//! on the safety-net interval. Between refreshes a local countdown keeps
//! the remaining time current without touching the ledger.

use fhe_quest_protocol::Wei;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::QuestError;
use crate::grid::GridState;
use crate::ledger::{ContractTransport, GameSession, LedgerClient, PlayerStats};

/// Serializable view of the store for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub game: Option<GameSession>,
    pub is_active: bool,
    pub remaining_seconds: u64,
    pub attempt_fee: Wei,
    pub wrong_attempts: u64,
    pub is_creator: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    game: Option<GameSession>,
    player: PlayerStats,
    displayed_wrong_attempts: u64,
    attempt_fee: Wei,
    is_creator: bool,
    active: bool,
    remaining: u64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game(&self) -> Option<&GameSession> {
        self.game.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining
    }

    pub fn attempt_fee(&self) -> Wei {
        self.attempt_fee
    }

    /// Ledger value, never incremented locally.
    pub fn player_stats(&self) -> PlayerStats {
        self.player
    }

    /// What the UI shows: ledger value plus locally resolved misses since
    /// the last refresh.
    pub fn displayed_wrong_attempts(&self) -> u64 {
        self.displayed_wrong_attempts
    }

    pub fn is_creator(&self) -> bool {
        self.is_creator
    }

    /// Re-fetches game stats, player stats, attempt fee and owner, then
    /// applies them in one step.
    pub async fn refresh<C: ContractTransport>(
        &mut self,
        ledger: &LedgerClient<C>,
        grid: &mut GridState,
        now: u64,
    ) -> Result<(), QuestError> {
        let game = ledger.get_game_stats().await?;
        let player = ledger.get_player_stats(ledger.account()).await?;
        let fee = ledger.get_attempt_fee().await?;
        let is_creator = match ledger.owner().await {
            Ok(owner) => &owner == ledger.account(),
            Err(err) => {
                warn!(error = %err, "owner lookup failed; treating account as non-creator");
                false
            }
        };

        if grid.track_game(game.id) {
            info!(game_id = game.id, "new game observed; grid reset");
        }
        self.apply(game, player, fee, is_creator, now);
        Ok(())
    }

    fn apply(&mut self, game: GameSession, player: PlayerStats, fee: Wei, is_creator: bool, now: u64) {
        let remaining = game.remaining_at(now);
        self.active = game.accepts_attempts() && remaining > 0;
        self.remaining = if game.accepts_attempts() { remaining } else { 0 };
        debug!(
            game_id = game.id,
            active = self.active,
            remaining = self.remaining,
            wrong_attempts = player.wrong_attempts,
            "session store refreshed"
        );
        self.game = Some(game);
        self.player = player;
        self.displayed_wrong_attempts = player.wrong_attempts;
        self.attempt_fee = fee;
        self.is_creator = is_creator;
    }

    /// Local countdown step. Returns true if this tick expired the game.
    pub fn tick(&mut self, now: u64) -> bool {
        let Some(game) = &self.game else {
            return false;
        };
        if !self.active {
            return false;
        }
        self.remaining = game.remaining_at(now);
        if self.remaining == 0 {
            self.active = false;
            info!(game_id = game.id, "countdown reached zero; game marked inactive");
            return true;
        }
        false
    }

    pub(crate) fn note_wrong_attempt(&mut self) {
        self.displayed_wrong_attempts += 1;
    }

    pub(crate) fn mark_inactive(&mut self) {
        self.active = false;
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            game: self.game.clone(),
            is_active: self.active,
            remaining_seconds: self.remaining,
            attempt_fee: self.attempt_fee,
            wrong_attempts: self.displayed_wrong_attempts,
            is_creator: self.is_creator,
        }
    }
}
