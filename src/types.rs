use std::fmt;

use serde::{Deserialize, Serialize};
use shakmaty::{Color, Move};

/// A move pulled out of model text. Not validated against any position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMove {
    /// Normalized move token, either UCI (`e2e4`) or SAN (`Nf3`, `O-O`).
    pub text: String,
    /// Free-form commentary the model attached to the move, if any.
    pub rationale: Option<String>,
    pub stage: ExtractionStage,
}

/// Which parser stage produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStage {
    /// Tagged field, labelled field or JSON key.
    Delimited,
    /// First move-like token anywhere in the text.
    Pattern,
    /// Lenient reading of the first word.
    FirstToken,
}

/// Notation used for the move that goes back to the evaluator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Notation {
    #[default]
    Uci,
    San,
}

/// Why the fallback policy had to pick the move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Backend down or erroring.
    InferenceUnavailable,
    /// Response budget expired before the backend answered.
    Timeout,
    /// Completion contained nothing that looks like a move.
    NoCandidate,
    /// A candidate was found but it is not legal here.
    IllegalCandidate,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InferenceUnavailable => "inference backend unavailable",
            Self::Timeout => "response budget exceeded",
            Self::NoCandidate => "no move found in completion",
            Self::IllegalCandidate => "proposed move is illegal",
        };
        f.write_str(s)
    }
}

/// Where the resolved move came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveSource {
    /// First candidate in the completion, legal as proposed.
    Model,
    /// A later move-like token in the completion that turned out legal.
    Rescued,
    Fallback(FallbackReason),
}

impl MoveSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Rescued => "rescued",
            Self::Fallback(_) => "fallback",
        }
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            Self::Fallback(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// The final answer for a non-terminal position. Always a member of the
/// legal move set of the position it was resolved against.
#[derive(Debug, Clone)]
pub struct ResolvedMove {
    pub mv: Move,
    pub uci: String,
    pub san: String,
    pub rationale: Option<String>,
    pub source: MoveSource,
}

impl ResolvedMove {
    pub fn in_notation(&self, notation: Notation) -> &str {
        match notation {
            Notation::Uci => &self.uci,
            Notation::San => &self.san,
        }
    }
}

/// Why a position has no move to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    Checkmate {
        #[serde(serialize_with = "serialize_color")]
        winner: Color,
    },
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
}

impl Termination {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Checkmate { .. } => "checkmate",
            Self::Stalemate => "stalemate",
            Self::InsufficientMaterial => "insufficient_material",
            Self::FiftyMoveRule => "fifty_move_rule",
            Self::ThreefoldRepetition => "threefold_repetition",
        }
    }

    /// PGN-style result string.
    pub fn result(&self) -> &'static str {
        match self {
            Self::Checkmate {
                winner: Color::White,
            } => "1-0",
            Self::Checkmate {
                winner: Color::Black,
            } => "0-1",
            _ => "1/2-1/2",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.result())
    }
}

fn serialize_color<S: serde::Serializer>(color: &Color, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(if color.is_white() { "white" } else { "black" })
}

/// Outcome of resolving one request.
#[derive(Debug, Clone)]
pub enum Resolution {
    Move(ResolvedMove),
    GameOver(Termination),
}

#[derive(Debug, Clone)]
pub struct MoveProbability {
    pub uci: shakmaty::uci::UciMove,
    pub probability: f32,
}

#[derive(Debug, Clone)]
pub struct PolicyEvaluation {
    /// List of legal moves and their probabilities, sorted highest to lowest
    pub policy: Vec<MoveProbability>,
    /// Win probability (0.0 to 1.0) for the side to move
    pub value: f32,
}

/// One message of an OpenAI-style chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, deserialize_with = "lenient_content")]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Accept a plain string, `null`, or a list of `{"type": "text", "text": …}`
/// parts.
fn lenient_content<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
