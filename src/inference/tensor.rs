use ndarray::{Array4, ArrayViewMut3, Axis};
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position, Role, Setup, Square};

use crate::error::{InferenceError, PositionError};

/// Number of input planes per position.
pub const PLANES: usize = 18;

/// Network input for a single position.
///
/// - `board_tensor` has shape `[1, 18, 8, 8]`. The 18 channels encode
///   piece locations, turn, castling rights and en passant.
/// - `mirrored` is set when Black was to move and the board was flipped so
///   the network always sees White to move. Policy moves must be mirrored
///   back before they mean anything on the real board.
/// - `position` is the (possibly mirrored) position the policy refers to.
pub struct PreparedInput {
    pub board_tensor: Array4<f32>,
    pub mirrored: bool,
    pub position: Chess,
}

/// Convert raw Elo ratings to the categories used by the network
/// (0..=10).
///
/// - Ratings below 1100 map to `0`.
/// - Ratings 1100–1999 are bucketed in 100‑point increments.
/// - Ratings 2000 and above map to `10`.
pub fn elo_category(elo: u32) -> i64 {
    match elo {
        0..1100 => 0,
        2000.. => 10,
        e => ((e - 1100) / 100 + 1) as i64,
    }
}

pub fn prepare(position: &Chess) -> Result<PreparedInput, InferenceError> {
    let mut setup = position.to_setup(EnPassantMode::Legal);
    let mirrored = setup.turn.is_black();
    if mirrored {
        setup.mirror();
    }

    let mut board_tensor = Array4::<f32>::zeros((1, PLANES, 8, 8));
    fill_planes(&setup, board_tensor.index_axis_mut(Axis(0), 0));

    let position: Chess = setup
        .position(CastlingMode::Standard)
        .map_err(PositionError::from)?;

    Ok(PreparedInput {
        board_tensor,
        mirrored,
        position,
    })
}

fn fill_planes(setup: &Setup, mut tensor: ArrayViewMut3<f32>) {
    // Pieces: white in channels 0..5, black in 6..11.
    for sq in Square::ALL {
        if let Some(piece) = setup.board.piece_at(sq) {
            let color_offset = if piece.color.is_white() { 0 } else { 6 };
            let role_offset = match piece.role {
                Role::Pawn => 0,
                Role::Knight => 1,
                Role::Bishop => 2,
                Role::Rook => 3,
                Role::Queen => 4,
                Role::King => 5,
            };
            tensor[[color_offset + role_offset, sq.rank() as usize, sq.file() as usize]] = 1.0;
        }
    }

    // Channel 12: all ones when White is to move.
    tensor
        .index_axis_mut(Axis(0), 12)
        .fill(f32::from(u8::from(setup.turn.is_white())));

    // Channels 13..16: castling rights keyed by original rook square.
    let castling_rights = [Square::H1, Square::A1, Square::H8, Square::A8]
        .map(|rook| setup.castling_rights.contains(rook));
    for (i, has_right) in castling_rights.into_iter().enumerate() {
        tensor
            .index_axis_mut(Axis(0), 13 + i)
            .fill(f32::from(u8::from(has_right)));
    }

    // Channel 17: one-hot en passant target.
    if let Some(ep_sq) = setup.ep_square {
        tensor[[17, ep_sq.rank() as usize, ep_sq.file() as usize]] = 1.0;
    }
}
