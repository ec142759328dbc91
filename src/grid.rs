//! Known-wrong cells of the current game.

use fhe_quest_protocol::{Coordinate, GRID_SIZE};
use serde::{Deserialize, Serialize};

const N: usize = GRID_SIZE as usize;

/// 10x10 matrix indexed `[y][x]`. Cells only ever flip to `true` within a
/// game; the whole grid is replaced when a new game id shows up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridState {
    game_id: Option<u64>,
    cells: [[bool; N]; N],
}

impl GridState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game_id(&self) -> Option<u64> {
        self.game_id
    }

    pub fn is_wrong(&self, coordinate: Coordinate) -> bool {
        self.cells[coordinate.y() as usize][coordinate.x() as usize]
    }

    pub(crate) fn mark_wrong(&mut self, coordinate: Coordinate) {
        self.cells[coordinate.y() as usize][coordinate.x() as usize] = true;
    }

    /// Clears the grid if `game_id` differs from the game it tracks.
    /// Returns true when a reset happened.
    pub(crate) fn track_game(&mut self, game_id: u64) -> bool {
        match self.game_id {
            Some(current) if current == game_id => false,
            Some(_) => {
                *self = Self { game_id: Some(game_id), ..Self::default() };
                true
            }
            None => {
                self.game_id = Some(game_id);
                false
            }
        }
    }

    pub fn wrong_count(&self) -> usize {
        self.cells.iter().flatten().filter(|c| **c).count()
    }

    pub fn rows(&self) -> &[[bool; N]; N] {
        &self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_is_sticky() {
        let mut grid = GridState::new();
        let c = Coordinate::new(3, 4).unwrap();
        assert!(!grid.is_wrong(c));
        grid.mark_wrong(c);
        grid.mark_wrong(c);
        assert!(grid.is_wrong(c));
        assert!(grid.rows()[4][3]);
        assert!(!grid.rows()[3][4]);
        assert_eq!(grid.wrong_count(), 1);
    }

    #[test]
    fn only_a_new_game_resets() {
        let mut grid = GridState::new();
        assert!(!grid.track_game(1));
        grid.mark_wrong(Coordinate::new(0, 0).unwrap());
        assert!(!grid.track_game(1));
        assert_eq!(grid.wrong_count(), 1);
        assert!(grid.track_game(2));
        assert_eq!(grid.wrong_count(), 0);
        assert_eq!(grid.game_id(), Some(2));
    }
}
