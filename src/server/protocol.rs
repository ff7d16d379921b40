//! Evaluator-facing wire types and response rendering.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::ResponseConfig;
use crate::types::{ChatMessage, FallbackReason, Notation, ResolvedMove, Termination};

/// Piece placement, side, castling, en passant and both clocks.
static FEN_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([rnbqkpRNBQKP1-8/]+\s[wb]\s[-KQkq]+\s[-a-h1-8]+\s\d+\s\d+)")
        .expect("fen regex")
});

/// Body of `POST /move`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MoveRequest {
    /// Starting position; the initial position when absent.
    #[serde(default)]
    pub fen: Option<String>,
    /// Moves played from `fen`, UCI or SAN.
    #[serde(default)]
    pub moves: Vec<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveResponse {
    /// The move in the configured notation; `null` when the game is over.
    #[serde(rename = "move")]
    pub mv: Option<String>,
    pub uci: Option<String>,
    pub san: Option<String>,
    pub comment: Option<String>,
    pub source: Option<&'static str>,
    pub fallback_reason: Option<FallbackReason>,
    pub game_over: Option<Termination>,
}

impl MoveResponse {
    pub fn resolved(mv: &ResolvedMove, notation: Notation) -> Self {
        Self {
            mv: Some(mv.in_notation(notation).to_string()),
            uci: Some(mv.uci.clone()),
            san: Some(mv.san.clone()),
            comment: mv.rationale.clone(),
            source: Some(mv.source.label()),
            fallback_reason: mv.source.fallback_reason(),
            game_over: None,
        }
    }

    pub fn game_over(termination: Termination) -> Self {
        Self {
            mv: None,
            uci: None,
            san: None,
            comment: None,
            source: None,
            fallback_reason: None,
            game_over: Some(termination),
        }
    }
}

/// Body of `POST /v1/chat/completions`. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// FEN embedded in the last user message, if any.
    pub fn fen(&self) -> Option<&str> {
        let last = self.messages.iter().rev().find(|m| m.role == "user")?;
        FEN_IN_TEXT
            .captures(&last.content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    pub fn word_count(&self) -> usize {
        self.messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum()
    }
}

/// Assistant content for a resolved move.
pub fn render_move_content(config: &ResponseConfig, mv: &ResolvedMove, notation: Notation) -> String {
    let rationale = match (&mv.rationale, mv.source.fallback_reason()) {
        (Some(text), _) => text.clone(),
        (None, Some(reason)) => format!("Fallback move: {reason}."),
        (None, None) => String::new(),
    };
    config
        .content_template
        .replace("{rationale}", &rationale)
        .replace("{move}", mv.in_notation(notation))
        .replace("{uci}", &mv.uci)
        .replace("{san}", &mv.san)
        .replace("{source}", mv.source.label())
}

/// Assistant content for a finished game.
pub fn render_game_over_content(config: &ResponseConfig, termination: &Termination) -> String {
    config
        .game_over_template
        .replace("{reason}", termination.reason())
        .replace("{result}", termination.result())
}

/// A `chat.completion` object carrying `content`.
pub fn chat_completion(
    config: &ResponseConfig,
    content: String,
    finish_reason: &str,
    prompt_tokens: usize,
) -> Value {
    let completion_tokens = content.split_whitespace().count();
    json!({
        "id": config.id,
        "object": config.object,
        "created": config.created,
        "model": config.model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        },
    })
}

/// Copy the configured extra fields into a JSON object. Fields the
/// response already has are left alone.
pub fn merge_extra(mut value: Value, extra: &Map<String, Value>) -> Value {
    if let Value::Object(object) = &mut value {
        for (key, extra_value) in extra {
            object
                .entry(key.clone())
                .or_insert_with(|| extra_value.clone());
        }
    }
    value
}
