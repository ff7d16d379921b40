//! Per-request move resolution.
//!
//! [`MoveResolver`] drives one request through
//! `Received → Decoded → Inferred → Parsed → Validated → Responded`. Any
//! failure after the board is decoded drops into the fallback branch, so
//! a non-terminal position always resolves to a legal move.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::board::BoardState;
use crate::config::Config;
use crate::error::{AgentError, ConfigError, InferenceError};
use crate::fallback::FallbackPolicy;
use crate::inference::{DecodingOptions, GenerationRequest, InferenceBackend};
use crate::parser::{candidate_tokens, extract_move, extract_rationale};
use crate::prompt::{PromptTemplate, augment_with_heuristics};
use crate::types::{ChatMessage, FallbackReason, MoveSource, Resolution, ResolvedMove};

/// Switches that shape resolution, independent of the backend.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Response budget; on expiry the fallback move is returned.
    pub timeout: Duration,
    pub scan_for_legal: bool,
    pub detect_draws: bool,
    pub heuristics: bool,
    pub forward_messages: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            scan_for_legal: true,
            detect_draws: false,
            heuristics: false,
            forward_messages: false,
        }
    }
}

/// Per-request decoding overrides sent by the evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

pub struct MoveResolver {
    backend: Arc<dyn InferenceBackend>,
    fallback: FallbackPolicy,
    template: PromptTemplate,
    options: DecodingOptions,
    settings: ResolverSettings,
}

impl MoveResolver {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        fallback: FallbackPolicy,
        template: PromptTemplate,
        options: DecodingOptions,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            backend,
            fallback,
            template,
            options,
            settings,
        }
    }

    /// Wire a resolver from the process configuration.
    pub fn from_config(
        backend: Arc<dyn InferenceBackend>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            backend,
            config.resolution.fallback_policy(),
            config.prompt_template()?,
            DecodingOptions {
                temperature: config.decoding.temperature,
                max_new_tokens: config.decoding.max_new_tokens,
                stop_sequences: config.decoding.stop_sequences.clone(),
            },
            ResolverSettings {
                timeout: config.server.response_timeout(),
                scan_for_legal: config.resolution.scan_for_legal,
                detect_draws: config.resolution.detect_draws,
                heuristics: config.resolution.heuristics,
                forward_messages: config.resolution.forward_messages,
            },
        ))
    }

    /// Resolve `board` to a move, or to the reason the game is over.
    ///
    /// `messages` are the evaluator's own chat messages, if it sent any;
    /// they reach the backend only in message-forwarding mode.
    #[instrument(skip_all, fields(fen = %board.fen(), backend = self.backend.name()))]
    pub async fn resolve(
        &self,
        board: &BoardState,
        messages: Option<&[ChatMessage]>,
        overrides: Overrides,
    ) -> Resolution {
        debug!(stage = "decoded", plies = board.history_len());

        if let Some(termination) = board.termination(self.settings.detect_draws) {
            info!(%termination, "game over, not calling the model");
            return Resolution::GameOver(termination);
        }

        let request = GenerationRequest {
            board: board.clone(),
            messages: self.backend_messages(board, messages),
            options: self.decoding_options(overrides),
        };

        let raw = match tokio::time::timeout(self.settings.timeout, self.backend.generate(&request))
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                let reason = match &err {
                    InferenceError::Timeout(_) => FallbackReason::Timeout,
                    _ => FallbackReason::InferenceUnavailable,
                };
                warn!(error = %err, "inference failed");
                return self.fall_back(board, reason);
            }
            Err(_) => {
                warn!(budget = ?self.settings.timeout, "inference exceeded response budget");
                return self.fall_back(board, FallbackReason::Timeout);
            }
        };
        debug!(stage = "inferred", chars = raw.len());

        match validate_completion(board, &raw, self.settings.scan_for_legal) {
            Ok(resolved) => {
                info!(uci = %resolved.uci, source = resolved.source.label(), "resolved move");
                Resolution::Move(resolved)
            }
            Err(reason) => self.fall_back(board, reason),
        }
    }

    /// Send the evaluator's messages to the backend unchanged and return
    /// the raw completion. Used when a request carries no position, so
    /// there is nothing to validate and no fallback to offer.
    #[instrument(skip_all, fields(backend = self.backend.name()))]
    pub async fn passthrough(
        &self,
        messages: &[ChatMessage],
        overrides: Overrides,
    ) -> Result<String, InferenceError> {
        let request = GenerationRequest {
            board: BoardState::default(),
            messages: messages.to_vec(),
            options: self.decoding_options(overrides),
        };
        tokio::time::timeout(self.settings.timeout, self.backend.generate(&request))
            .await
            .map_err(|_| InferenceError::Timeout(self.settings.timeout))?
    }

    fn fall_back(&self, board: &BoardState, reason: FallbackReason) -> Resolution {
        match self.fallback.fallback_move(board) {
            Ok(mv) => {
                let resolved = ResolvedMove {
                    mv,
                    uci: board.uci(mv),
                    san: board.san(mv),
                    rationale: None,
                    source: MoveSource::Fallback(reason),
                };
                warn!(%reason, uci = %resolved.uci, "using fallback move");
                Resolution::Move(resolved)
            }
            Err(AgentError::NoLegalMove(termination)) => Resolution::GameOver(termination),
        }
    }

    fn backend_messages(
        &self,
        board: &BoardState,
        messages: Option<&[ChatMessage]>,
    ) -> Vec<ChatMessage> {
        let forwarded = messages.filter(|m| self.settings.forward_messages && !m.is_empty());
        let Some(messages) = forwarded else {
            let mut prompt = self.template.render(board);
            if self.settings.heuristics && !self.template.as_str().contains("{heuristics}") {
                prompt = augment_with_heuristics(&prompt, board);
            }
            return vec![ChatMessage::user(prompt)];
        };

        let mut messages = messages.to_vec();
        if self.settings.heuristics {
            if let Some(last) = messages.iter_mut().rev().find(|m| m.role == "user") {
                last.content = augment_with_heuristics(&last.content, board);
            }
        }
        messages
    }

    fn decoding_options(&self, overrides: Overrides) -> DecodingOptions {
        let mut options = self.options.clone();
        if let Some(temperature) = overrides.temperature {
            options.temperature = temperature;
        }
        if let Some(max_tokens) = overrides.max_tokens {
            options.max_new_tokens = max_tokens;
        }
        options
    }
}

/// Parse `raw` and check the result against `board`.
///
/// The first extracted candidate wins when it is legal. Otherwise, with
/// `scan_for_legal`, every other move-like token is tried in order. The
/// error names why the fallback policy has to step in.
pub fn validate_completion(
    board: &BoardState,
    raw: &str,
    scan_for_legal: bool,
) -> Result<ResolvedMove, FallbackReason> {
    let candidate = extract_move(raw);
    debug!(stage = "parsed", candidate = ?candidate.as_ref().map(|c| c.text.as_str()));

    let rationale = candidate
        .as_ref()
        .and_then(|c| c.rationale.clone())
        .or_else(|| extract_rationale(raw));
    let resolved = |mv, source| ResolvedMove {
        mv,
        uci: board.uci(mv),
        san: board.san(mv),
        rationale: rationale.clone(),
        source,
    };

    let reason = match &candidate {
        Some(candidate) => match board.canonicalize(&candidate.text) {
            Ok(mv) => {
                debug!(stage = "validated", stage_hit = ?candidate.stage);
                return Ok(resolved(mv, MoveSource::Model));
            }
            Err(err) => {
                debug!(error = %err, "candidate rejected");
                FallbackReason::IllegalCandidate
            }
        },
        None => FallbackReason::NoCandidate,
    };

    if scan_for_legal {
        let first = candidate.as_ref().map(|c| c.text.as_str());
        let rescued = candidate_tokens(raw)
            .into_iter()
            .filter(|token| Some(token.as_str()) != first)
            .find_map(|token| board.canonicalize(&token).ok());
        if let Some(mv) = rescued {
            debug!(stage = "validated", "rescued a later token");
            return Ok(resolved(mv, MoveSource::Rescued));
        }
    }

    Err(reason)
}
