//! Deterministic move choice for when the model gives us nothing usable.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Deserialize;
use shakmaty::Move;

use crate::board::BoardState;
use crate::error::AgentError;
use crate::types::Termination;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// First move of the canonical ordering (`b1a3` from the start
    /// position).
    #[default]
    First,
    /// Uniform pick over the canonical ordering, seeded by the configured
    /// seed mixed with the position, so equal inputs give equal moves.
    Seeded,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackPolicy {
    strategy: FallbackStrategy,
    seed: u64,
}

impl FallbackPolicy {
    pub fn new(strategy: FallbackStrategy, seed: u64) -> Self {
        Self { strategy, seed }
    }

    /// Pick a legal move. Fails only on terminal positions, which the
    /// caller reports as game over.
    pub fn fallback_move(&self, board: &BoardState) -> Result<Move, AgentError> {
        let moves = board.legal_moves();
        if moves.is_empty() {
            let termination = board.termination(false).unwrap_or(Termination::Stalemate);
            return Err(AgentError::NoLegalMove(termination));
        }
        let index = match self.strategy {
            FallbackStrategy::First => 0,
            FallbackStrategy::Seeded => {
                let mut rng = position_rng(self.seed, board);
                rng.random_range(0..moves.len())
            }
        };
        Ok(moves[index])
    }
}

/// RNG seeded from `seed` and the FEN of `board`. FNV-1a keeps the mixing
/// stable across Rust releases, unlike `DefaultHasher`.
pub(crate) fn position_rng(seed: u64, board: &BoardState) -> Xoshiro256PlusPlus {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = board
        .fen()
        .bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME));
    Xoshiro256PlusPlus::seed_from_u64(seed ^ hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::STARTING_FEN;

    #[test]
    fn first_strategy_is_the_head_of_canonical_order() {
        let board = BoardState::from_fen(STARTING_FEN).unwrap();
        let policy = FallbackPolicy::default();
        let mv = policy.fallback_move(&board).unwrap();
        assert_eq!(board.uci(mv), "b1a3");
        assert_eq!(policy.fallback_move(&board).unwrap(), mv);
    }

    #[test]
    fn seeded_strategy_is_reproducible_and_legal() {
        let board = BoardState::from_fen(
            "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3",
        )
        .unwrap();
        let policy = FallbackPolicy::new(FallbackStrategy::Seeded, 42);
        let first = policy.fallback_move(&board).unwrap();
        for _ in 0..10 {
            assert_eq!(policy.fallback_move(&board).unwrap(), first);
        }
        assert!(board.is_legal(&first));

        let again = FallbackPolicy::new(FallbackStrategy::Seeded, 42);
        assert_eq!(again.fallback_move(&board).unwrap(), first);
    }

    #[test]
    fn terminal_positions_have_no_fallback() {
        let mate = BoardState::from_fen(
            "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
        )
        .unwrap();
        let err = FallbackPolicy::default().fallback_move(&mate).unwrap_err();
        assert!(matches!(
            err,
            AgentError::NoLegalMove(Termination::Checkmate { .. })
        ));
    }
}
