//! Grid geometry and the move clamp the game program applies on-chain.

use serde::{Deserialize, Serialize};

/// Side length of the square board.
pub const BOARD_SIZE: u8 = 100;

/// Where a freshly joined player is placed.
pub const INITIAL_POSITION: Position = Position { x: 10, y: 10 };

/// A cell on the board. Both coordinates are always `< BOARD_SIZE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: u8,
    pub y: u8,
}

impl Position {
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// Apply a signed step and clamp each axis into `[0, extent - 1]`.
    pub fn step(self, dx: i8, dy: i8, extent: u8) -> Self {
        Self {
            x: clamp_axis(self.x, dx, extent),
            y: clamp_axis(self.y, dy, extent),
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

fn clamp_axis(current: u8, delta: i8, extent: u8) -> u8 {
    let max = i16::from(extent.max(1)) - 1;
    (i16::from(current) + i16::from(delta)).clamp(0, max) as u8
}

/// The position the program will produce for a move request on the
/// standard board.
pub fn clamp_move(from: Position, dx: i8, dy: i8) -> Position {
    from.step(dx, dy, BOARD_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn negative_overshoot_clamps_to_origin() {
        assert_eq!(clamp_move(Position::new(10, 10), -50, -50), Position::new(0, 0));
    }

    #[test]
    fn positive_overshoot_clamps_to_far_edge() {
        assert_eq!(clamp_move(Position::new(10, 10), 127, 127), Position::new(99, 99));
    }

    #[test]
    fn in_bounds_move_is_exact() {
        assert_eq!(clamp_move(INITIAL_POSITION, 3, -2), Position::new(13, 8));
    }

    proptest! {
        #[test]
        fn clamped_moves_stay_on_board(x in 0u8..BOARD_SIZE, y in 0u8..BOARD_SIZE, dx in any::<i8>(), dy in any::<i8>()) {
            let next = clamp_move(Position::new(x, y), dx, dy);
            prop_assert!(next.x < BOARD_SIZE);
            prop_assert!(next.y < BOARD_SIZE);
        }
    }
}
