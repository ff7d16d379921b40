//! Board state and move legality.
//!
//! [`BoardState`] wraps a `shakmaty` position together with the keys of
//! the positions that led to it. Everything here is pure rules
//! enforcement: no evaluation and no search.
//!
//! Legal moves are always reported in the canonical ordering: source
//! square index, then destination square index (a1 = 0 … h8 = 63), then
//! promotion piece (none, knight, bishop, rook, queen). Squares are read
//! off the standard UCI form of the move, so castling sorts as the king
//! move (`e1g1`, `e1c1`).

use shakmaty::{
    CastlingMode, Chess, Color, EnPassantMode, Move, Position,
    fen::Fen,
    san::{San, SanPlus},
    uci::UciMove,
};

use crate::error::{MoveError, PositionError};
use crate::types::Termination;

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Immutable snapshot of a game: the current position plus the
/// repetition keys of every earlier position in the supplied history.
#[derive(Debug, Clone)]
pub struct BoardState {
    position: Chess,
    previous: Vec<String>,
}

impl Default for BoardState {
    fn default() -> Self {
        Self::from_position(Chess::default())
    }
}

impl BoardState {
    pub fn from_position(position: Chess) -> Self {
        Self {
            position,
            previous: Vec::new(),
        }
    }

    /// Parse a FEN and reject positions `shakmaty` considers inconsistent
    /// (missing kings, side not to move in check, impossible castling
    /// rights and the like).
    pub fn from_fen(fen: &str) -> Result<Self, PositionError> {
        let fen: Fen = fen.trim().parse()?;
        let position: Chess = fen.into_position(CastlingMode::Standard)?;
        Ok(Self::from_position(position))
    }

    /// Start from `fen` (or the initial position) and replay `moves`, each
    /// given in UCI or SAN.
    pub fn from_fen_and_moves<S: AsRef<str>>(
        fen: Option<&str>,
        moves: &[S],
    ) -> Result<Self, PositionError> {
        let mut state = match fen {
            Some(fen) if !fen.trim().is_empty() && fen.trim() != "startpos" => {
                Self::from_fen(fen)?
            }
            _ => Self::default(),
        };
        for (ply, text) in moves.iter().enumerate() {
            let text = text.as_ref();
            let mv = state
                .canonicalize(text)
                .map_err(|_| PositionError::IllegalHistory {
                    ply,
                    mv: text.to_string(),
                })?;
            state = state.play(mv);
        }
        Ok(state)
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }

    pub fn turn(&self) -> Color {
        self.position.turn()
    }

    pub fn fen(&self) -> String {
        Fen::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    /// FEN without the move clocks; equal keys mean the same position for
    /// repetition purposes.
    fn repetition_key(&self) -> String {
        let fen = self.fen();
        fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
    }

    /// Number of plies in the supplied history.
    pub fn history_len(&self) -> usize {
        self.previous.len()
    }

    /// Successor state. `mv` must be legal here.
    pub fn play(&self, mv: Move) -> Self {
        let mut position = self.position.clone();
        position.play_unchecked(mv);
        let mut previous = self.previous.clone();
        previous.push(self.repetition_key());
        Self { position, previous }
    }

    /// Every legal move for the side to move, in canonical order.
    pub fn legal_moves(&self) -> Vec<Move> {
        let mut moves: Vec<Move> = self.position.legal_moves().into_iter().collect();
        moves.sort_by_key(canonical_key);
        moves
    }

    pub fn is_legal(&self, mv: &Move) -> bool {
        self.position.legal_moves().contains(mv)
    }

    /// Match a UCI or SAN string against the legal move set.
    pub fn canonicalize(&self, text: &str) -> Result<Move, MoveError> {
        let text = text.trim();
        if let Ok(uci) = text.parse::<UciMove>() {
            return uci
                .to_move(&self.position)
                .map_err(|_| MoveError::Illegal(text.to_string()));
        }
        match text.parse::<SanPlus>() {
            Ok(san) => san
                .san
                .to_move(&self.position)
                .map_err(|_| MoveError::Illegal(text.to_string())),
            Err(_) => Err(MoveError::Unparsable(text.to_string())),
        }
    }

    pub fn is_legal_str(&self, text: &str) -> bool {
        self.canonicalize(text).is_ok()
    }

    pub fn uci(&self, mv: Move) -> String {
        mv.to_uci(CastlingMode::Standard).to_string()
    }

    pub fn san(&self, mv: Move) -> String {
        SanPlus::from_move(self.position.clone(), mv).to_string()
    }

    /// SAN without check or mate suffix, as used in move lists.
    pub fn san_plain(&self, mv: Move) -> String {
        San::from_move(&self.position, mv).to_string()
    }

    /// Why this position has no move to play, if it has none. Draw rules
    /// are only consulted when `detect_draws` is set.
    pub fn termination(&self, detect_draws: bool) -> Option<Termination> {
        if self.position.is_checkmate() {
            return Some(Termination::Checkmate {
                winner: !self.position.turn(),
            });
        }
        if self.position.is_stalemate() {
            return Some(Termination::Stalemate);
        }
        if !detect_draws {
            return None;
        }
        if self.position.is_insufficient_material() {
            return Some(Termination::InsufficientMaterial);
        }
        if self.position.halfmoves() >= 100 {
            return Some(Termination::FiftyMoveRule);
        }
        let key = self.repetition_key();
        let seen = self.previous.iter().filter(|k| **k == key).count();
        if seen >= 2 {
            return Some(Termination::ThreefoldRepetition);
        }
        None
    }
}

/// Sort key for the canonical ordering.
pub fn canonical_key(mv: &Move) -> (u32, u32, u32) {
    match mv.to_uci(CastlingMode::Standard) {
        UciMove::Normal {
            from,
            to,
            promotion,
        } => (
            u32::from(from),
            u32::from(to),
            promotion.map_or(0, |role| role as u32),
        ),
        // drops and null moves never occur in standard chess
        _ => (u32::MAX, u32::MAX, u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOOLS_MATE: &str = "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3";
    const STALEMATE: &str = "7k/5Q2/6K1/8/8/8/8/8 b - - 0 1";

    fn ucis(state: &BoardState) -> Vec<String> {
        state
            .legal_moves()
            .into_iter()
            .map(|m| state.uci(m))
            .collect()
    }

    #[test]
    fn start_position_has_twenty_moves_in_canonical_order() {
        let state = BoardState::from_fen(STARTING_FEN).unwrap();
        let moves = ucis(&state);
        assert_eq!(moves.len(), 20);
        assert_eq!(&moves[..4], &["b1a3", "b1c3", "g1f3", "g1h3"]);
        assert_eq!(moves[4], "a2a3");
        assert_eq!(moves.last().unwrap(), "h2h4");
    }

    #[test]
    fn canonicalize_accepts_uci_and_san() {
        let state = BoardState::default();
        let by_uci = state.canonicalize("e2e4").unwrap();
        let by_san = state.canonicalize("e4").unwrap();
        assert_eq!(by_uci, by_san);
        assert_eq!(state.uci(by_san), "e2e4");
        assert_eq!(state.san(by_uci), "e4");

        assert_eq!(
            state.canonicalize("e2e5"),
            Err(MoveError::Illegal("e2e5".to_string()))
        );
        assert_eq!(
            state.canonicalize("hello"),
            Err(MoveError::Unparsable("hello".to_string()))
        );
    }

    #[test]
    fn canonicalize_is_idempotent_on_legal_moves() {
        let fens = [
            STARTING_FEN,
            "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1",
            "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3",
            "8/P7/8/8/8/8/8/k6K w - - 0 1",
            "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 3 3",
        ];
        for fen in fens {
            let state = BoardState::from_fen(fen).unwrap();
            for mv in state.legal_moves() {
                let once = state.canonicalize(&state.uci(mv)).unwrap();
                let twice = state.canonicalize(&state.uci(once)).unwrap();
                assert_eq!(once, mv, "{fen}");
                assert_eq!(twice, once, "{fen}");
                let from_san = state.canonicalize(&state.san(mv)).unwrap();
                assert_eq!(from_san, mv, "{fen}");
            }
        }
    }

    #[test]
    fn special_moves() {
        let castling = BoardState::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let moves = ucis(&castling);
        assert!(moves.contains(&"e1g1".to_string()));
        assert!(moves.contains(&"e1c1".to_string()));
        let short = castling.canonicalize("O-O").unwrap();
        assert_eq!(castling.uci(short), "e1g1");

        let ep = BoardState::from_fen("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3")
            .unwrap();
        assert!(ep.is_legal_str("e5f6"));
        assert!(!ep.is_legal_str("e5d6"));

        let promo = BoardState::from_fen("8/P7/8/8/8/8/8/k6K w - - 0 1").unwrap();
        let queen = promo.canonicalize("a8=Q").unwrap();
        assert_eq!(promo.uci(queen), "a7a8q");
        let moves = ucis(&promo);
        let first_promotions: Vec<_> = moves.iter().filter(|m| m.starts_with("a7")).collect();
        assert_eq!(first_promotions, ["a7a8n", "a7a8b", "a7a8r", "a7a8q"]);
    }

    #[test]
    fn rejects_bad_positions() {
        assert!(matches!(
            BoardState::from_fen("not a fen"),
            Err(PositionError::InvalidFen(_))
        ));
        assert!(matches!(
            BoardState::from_fen("8/8/8/8/8/8/8/K7 w - - 0 1"),
            Err(PositionError::Inconsistent(_))
        ));
        // black is in check but it is white's turn
        assert!(matches!(
            BoardState::from_fen("4k3/8/8/8/8/8/4R3/4K3 w - - 0 1"),
            Err(PositionError::Inconsistent(_))
        ));
    }

    #[test]
    fn replays_history() {
        let state = BoardState::from_fen_and_moves(None, &["e2e4", "e5", "Nf3"]).unwrap();
        assert_eq!(state.turn(), Color::Black);
        assert_eq!(state.history_len(), 3);
        assert!(state.fen().starts_with("rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b"));

        let err = BoardState::from_fen_and_moves(Some(STARTING_FEN), &["e2e4", "e2e4"]).unwrap_err();
        assert!(matches!(err, PositionError::IllegalHistory { ply: 1, .. }));
    }

    #[test]
    fn detects_terminal_positions() {
        let mate = BoardState::from_fen(FOOLS_MATE).unwrap();
        assert!(mate.legal_moves().is_empty());
        assert_eq!(
            mate.termination(false),
            Some(Termination::Checkmate {
                winner: Color::Black
            })
        );

        let stale = BoardState::from_fen(STALEMATE).unwrap();
        assert_eq!(stale.termination(false), Some(Termination::Stalemate));

        let bare_kings = BoardState::from_fen("8/8/4k3/8/8/4K3/8/8 w - - 0 1").unwrap();
        assert_eq!(bare_kings.termination(false), None);
        assert_eq!(
            bare_kings.termination(true),
            Some(Termination::InsufficientMaterial)
        );
    }

    #[test]
    fn fifty_move_rule_needs_draw_detection() {
        let quiet = BoardState::from_fen("8/8/4k3/8/8/4K3/4R3/8 w - - 100 80").unwrap();
        assert!(!quiet.legal_moves().is_empty());
        assert_eq!(quiet.termination(false), None);
        assert_eq!(quiet.termination(true), Some(Termination::FiftyMoveRule));

        let fresh = BoardState::from_fen("8/8/4k3/8/8/4K3/4R3/8 w - - 99 80").unwrap();
        assert_eq!(fresh.termination(true), None);
    }

    #[test]
    fn fen_keeps_legal_en_passant_only() {
        let fen = "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3";
        assert_eq!(BoardState::from_fen(fen).unwrap().fen(), fen);

        let state = BoardState::from_fen_and_moves(None, &["e2e4"]).unwrap();
        assert_eq!(
            state.fen(),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
    }

    #[test]
    fn detects_repetition_only_when_asked() {
        let shuffle = ["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8"];
        let state = BoardState::from_fen_and_moves(None, &shuffle).unwrap();
        assert_eq!(state.termination(false), None);
        assert_eq!(
            state.termination(true),
            Some(Termination::ThreefoldRepetition)
        );
    }
}
