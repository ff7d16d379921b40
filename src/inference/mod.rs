//! Inference adapter: one capability, several backends.
//!
//! The serving layer only ever sees `Arc<dyn InferenceBackend>`. Which
//! implementation sits behind it is decided once, at startup, by
//! [`build_backend`].

mod download;
mod local;
mod remote;
mod tensor;
mod vocab;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::board::BoardState;
use crate::config::{BackendKind, ModelConfig};
use crate::error::InferenceError;
use crate::types::ChatMessage;

pub use download::resolve_model;
pub use local::{LocalBackend, PolicyNetwork};
pub use remote::RemoteBackend;
pub use vocab::MoveVocabulary;

/// Decoding parameters honoured by every backend that can honour them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodingOptions {
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub stop_sequences: Vec<String>,
}

impl Default for DecodingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_new_tokens: 150,
            stop_sequences: Vec::new(),
        }
    }
}

/// Everything a backend may look at to produce a completion.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub board: BoardState,
    /// Conversation sent to text models, usually a single user message
    /// holding the rendered prompt template.
    pub messages: Vec<ChatMessage>,
    pub options: DecodingOptions,
}

/// Produce raw completion text for a position.
///
/// Implementations must be stateless per call: nothing a call does may
/// affect a concurrent or later call, so a dropped request can simply
/// abandon its future.
///
/// Backends read different parts of a [`GenerationRequest`]:
///
/// - [`RemoteBackend`] sends `messages` (the rendered prompt template or
///   the forwarded conversation) with every field of `options`.
/// - [`LocalBackend`] runs a policy network, which has no text input. It
///   reads `board` and `options.temperature`, applies
///   `options.stop_sequences` to its output, and ignores `messages` and
///   `options.max_new_tokens`. Prompt templates and heuristics therefore
///   have no effect on it.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferenceError>;
}

/// Cut `text` at the earliest stop sequence, if any occurs.
pub fn truncate_at_stop(mut text: String, stop_sequences: &[String]) -> String {
    let cut = stop_sequences
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min();
    if let Some(cut) = cut {
        text.truncate(cut);
    }
    text
}

/// Build the configured backend. Loads weights for the local backend, so
/// this must run before the async runtime starts and its failure is fatal.
pub fn build_backend(config: &ModelConfig) -> Result<Arc<dyn InferenceBackend>, InferenceError> {
    match config.backend {
        BackendKind::Local => {
            let path = resolve_model(&config.id, &config.cache_dir)?;
            Ok(Arc::new(LocalBackend::load(&path, &config.local)?))
        }
        BackendKind::Remote => Ok(Arc::new(RemoteBackend::new(&config.id, &config.remote)?)),
    }
}
