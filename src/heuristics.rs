//! Static position summary appended to prompts as a hint for the model.
//!
//! Every figure is from the side to move's point of view: a positive
//! value favours the player about to move.

use std::fmt;

use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position, Role, Square};

use crate::board::BoardState;

const PIECE_VALUES: [(Role, f32); 5] = [
    (Role::Pawn, 1.0),
    (Role::Knight, 3.2),
    (Role::Bishop, 3.3),
    (Role::Rook, 5.0),
    (Role::Queen, 9.5),
];

const EXTENDED_CENTER: [Square; 16] = [
    Square::D4,
    Square::D5,
    Square::E4,
    Square::E5,
    Square::C3,
    Square::C4,
    Square::C5,
    Square::C6,
    Square::D3,
    Square::E3,
    Square::F3,
    Square::F4,
    Square::F5,
    Square::F6,
    Square::D6,
    Square::E6,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSummary {
    pub side: Color,
    pub material: f32,
    pub mobility: i32,
    pub center_control: i32,
    pub king_shield: i32,
    pub passed_pawns: i32,
}

impl PositionSummary {
    pub fn of(state: &BoardState) -> Self {
        let pos = state.position();
        let us = pos.turn();
        let them = !us;
        let diff = |f: &dyn Fn(&Chess, Color) -> i32| f(pos, us) - f(pos, them);
        Self {
            side: us,
            material: material(pos, us) - material(pos, them),
            mobility: diff(&mobility),
            center_control: diff(&center_control),
            king_shield: diff(&king_shield),
            passed_pawns: diff(&passed_pawns),
        }
    }
}

impl fmt::Display for PositionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.side.is_white() { "White" } else { "Black" };
        write!(
            f,
            "Side to move: {side}. Material (stm): {:+.2}; Mobility diff: {:+}; \
             Center control diff: {:+}; King shield diff: {:+}; Passed pawns diff: {:+}.",
            self.material, self.mobility, self.center_control, self.king_shield, self.passed_pawns
        )
    }
}

fn material(pos: &Chess, color: Color) -> f32 {
    let board = pos.board();
    PIECE_VALUES
        .iter()
        .map(|&(role, value)| (board.by_role(role) & board.by_color(color)).count() as f32 * value)
        .sum()
}

/// Legal move count as if `color` were to move. Positions that become
/// invalid with the turn flipped (the other king in check) count zero.
fn mobility(pos: &Chess, color: Color) -> i32 {
    if pos.turn() == color {
        return pos.legal_moves().len() as i32;
    }
    let mut setup = pos.to_setup(EnPassantMode::Legal);
    setup.turn = color;
    setup.ep_square = None;
    setup
        .position::<Chess>(CastlingMode::Standard)
        .map_or(0, |flipped| flipped.legal_moves().len() as i32)
}

fn center_control(pos: &Chess, color: Color) -> i32 {
    let board = pos.board();
    EXTENDED_CENTER
        .iter()
        .filter(|&&sq| board.attacks_to(sq, color, board.occupied()).any())
        .count() as i32
}

fn square_at(file: i32, rank: i32) -> Option<Square> {
    ((0..8).contains(&file) && (0..8).contains(&rank)).then(|| Square::new((rank * 8 + file) as u32))
}

fn forward(color: Color) -> i32 {
    if color.is_white() { 1 } else { -1 }
}

fn is_pawn_of(pos: &Chess, sq: Square, color: Color) -> bool {
    pos.board()
        .piece_at(sq)
        .is_some_and(|p| p.role == Role::Pawn && p.color == color)
}

/// Own pawns on the three squares in front of the king.
fn king_shield(pos: &Chess, color: Color) -> i32 {
    let Some(king) = pos.board().king_of(color) else {
        return 0;
    };
    let file = king.file() as i32;
    let rank = king.rank() as i32 + forward(color);
    (-1..=1)
        .filter_map(|df| square_at(file + df, rank))
        .filter(|&sq| is_pawn_of(pos, sq, color))
        .count() as i32
}

/// Pawns with no enemy pawn ahead of them on their own or adjacent files.
fn passed_pawns(pos: &Chess, color: Color) -> i32 {
    let board = pos.board();
    let pawns = board.by_role(Role::Pawn) & board.by_color(color);
    let dir = forward(color);
    pawns
        .into_iter()
        .filter(|pawn| {
            let file = pawn.file() as i32;
            let mut rank = pawn.rank() as i32 + dir;
            while (0..8).contains(&rank) {
                let blocked = (-1..=1)
                    .filter_map(|df| square_at(file + df, rank))
                    .any(|sq| is_pawn_of(pos, sq, !color));
                if blocked {
                    return false;
                }
                rank += dir;
            }
            true
        })
        .count() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_position_is_balanced() {
        let summary = PositionSummary::of(&BoardState::default());
        assert_eq!(summary.material, 0.0);
        assert_eq!(summary.mobility, 0);
        assert_eq!(summary.king_shield, 0);
        assert_eq!(summary.passed_pawns, 0);
        assert_eq!(
            summary.to_string(),
            "Side to move: White. Material (stm): +0.00; Mobility diff: +0; \
             Center control diff: +0; King shield diff: +0; Passed pawns diff: +0."
        );
    }

    #[test]
    fn counts_material_and_passed_pawns_for_side_to_move() {
        // black to move, white is up a rook and has a passed a-pawn
        let state = BoardState::from_fen("4k3/8/8/8/8/8/P7/R3K3 b - - 0 1").unwrap();
        let summary = PositionSummary::of(&state);
        assert_eq!(summary.side, Color::Black);
        assert_eq!(summary.material, -6.0);
        assert_eq!(summary.passed_pawns, -1);
        assert!(summary.to_string().starts_with("Side to move: Black. Material (stm): -6.00;"));
    }

    #[test]
    fn king_shield_counts_pawns_in_front() {
        let state =
            BoardState::from_fen("4k3/8/8/8/8/8/5PPP/6K1 w - - 0 1").unwrap();
        let summary = PositionSummary::of(&state);
        assert_eq!(summary.king_shield, 3);
    }
}
