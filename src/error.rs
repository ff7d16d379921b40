//! Error types for the chess agent.
//!
//! This crate uses `thiserror` to provide a small enumeration per layer.
//! Position errors describe bad evaluator input, inference errors describe
//! a model that could not answer, and [`AgentError`] is what the
//! resolution layer surfaces to the serving code.

use std::time::Duration;

use thiserror::Error;

/// The board state supplied with a request could not be turned into a
/// consistent chess position.
#[derive(Error, Debug)]
pub enum PositionError {
    /// The provided FEN string could not be parsed.
    #[error("Invalid FEN: {0}")]
    InvalidFen(#[from] shakmaty::fen::ParseFenError),

    /// A parsed position is invalid from the perspective of `shakmaty`.
    #[error("Invalid Chess Position: {0}")]
    Inconsistent(#[from] shakmaty::PositionError<shakmaty::Chess>),

    /// A move in the supplied history is not legal where it was played.
    #[error("Illegal history move {mv:?} at ply {ply}")]
    IllegalHistory { ply: usize, mv: String },
}

/// A move string could not be matched to a legal move.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    #[error("{0:?} is neither UCI nor SAN")]
    Unparsable(String),

    #[error("{0:?} is not legal in this position")]
    Illegal(String),
}

/// The inference backend failed to produce text.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// The backend is unreachable or refused the request.
    #[error("inference backend unavailable: {0}")]
    Unavailable(String),

    /// Generation did not finish within the allotted budget.
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    /// Wraps an error returned by the underlying ONNX Runtime bindings.
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),

    /// Occurs when an ndarray has an unexpected shape during tensor
    /// preparation or extraction.
    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The move vocabulary file is missing or malformed.
    #[error("move vocabulary error: {0}")]
    Vocabulary(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Position(#[from] PositionError),
}

impl InferenceError {
    /// Timeouts and unreachable backends are transient; the other variants
    /// point at a broken model or a bug.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_) | Self::Http(_))
    }
}

/// The configuration file or command line could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that reach the serving layer.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The position is terminal, so there is nothing to play.
    #[error("no legal move: {0}")]
    NoLegalMove(crate::types::Termination),
}
