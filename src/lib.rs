//! Serve a language model as a chess agent.
//!
//! A request carries a position; the crate asks a model for a move, pulls
//! a candidate out of whatever text comes back, checks it against the
//! rules, and falls back to a deterministic legal move when the model
//! fails. A non-terminal position therefore always gets a legal answer,
//! and a terminal one gets a game-over signal instead of a made-up move.
//!
//! The pieces, leaf first:
//!
//! - [`board`]: positions, legality, canonical move ordering.
//! - [`parser`]: candidate extraction from free-form completions.
//! - [`fallback`]: deterministic move choice.
//! - [`inference`]: the backend seam, with an in-process ONNX policy
//!   network and an OpenAI-compatible remote client.
//! - [`resolver`]: the per-request pipeline tying the above together.
//! - [`server`]: the HTTP endpoints.
//!
//! The library re-exports `shakmaty` for building positions.

pub mod board;
pub mod config;
pub mod error;
pub mod fallback;
pub mod heuristics;
pub mod inference;
pub mod logging;
pub mod parser;
pub mod prompt;
pub mod resolver;
pub mod server;
pub mod types;

pub use board::BoardState;
pub use error::{AgentError, ConfigError, InferenceError, MoveError, PositionError};
pub use inference::{DecodingOptions, GenerationRequest, InferenceBackend};
pub use resolver::{MoveResolver, Overrides, ResolverSettings};
pub use types::{CandidateMove, FallbackReason, MoveSource, Resolution, ResolvedMove, Termination};

/// Re-export of `shakmaty` for convenience when building positions.
pub use shakmaty;
