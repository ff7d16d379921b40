//! Process configuration.
//!
//! Loaded once at startup from an optional TOML file; every field has a
//! default so an empty file (or none at all) is a valid configuration.
//! Command-line flags override a handful of fields after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::fallback::{FallbackPolicy, FallbackStrategy};
use crate::prompt::{DEFAULT_INSTRUCTIONS, DEFAULT_TEMPLATE, PromptTemplate};
use crate::types::Notation;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub decoding: DecodingConfig,
    pub resolution: ResolutionConfig,
    pub response: ResponseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Budget for one request, inference included. On expiry the
    /// fallback move is returned.
    pub response_timeout_ms: u64,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            response_timeout_ms: 20_000,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// ONNX policy network run inside this process.
    Local,
    /// OpenAI-compatible chat completions server.
    #[default]
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Model identifier: a file path or URL for the local backend, the
    /// served model name for the remote one. Fixed for the process
    /// lifetime.
    pub id: String,
    pub backend: BackendKind,
    /// Where downloaded weights are kept.
    pub cache_dir: PathBuf,
    pub local: LocalSettings,
    pub remote: RemoteSettings,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            backend: BackendKind::default(),
            cache_dir: PathBuf::from(".cache/models"),
            local: LocalSettings::default(),
            remote: RemoteSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionEngine {
    #[default]
    Tract,
    Candle,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalSettings {
    pub engine: ExecutionEngine,
    /// JSON map from UCI move to policy index. Defaults to
    /// `all_moves.json` next to the model file.
    pub vocabulary: Option<PathBuf>,
    /// Independent sessions, so that concurrent games do not queue on a
    /// single one.
    pub sessions: usize,
    pub elo_self: u32,
    pub elo_oppo: u32,
    pub seed: u64,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            engine: ExecutionEngine::default(),
            vocabulary: None,
            sessions: 2,
            elo_self: 1500,
            elo_oppo: 1500,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSettings {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodingConfig {
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub stop_sequences: Vec<String>,
    /// Inline template; wins over `prompt_template_file`.
    pub prompt_template: Option<String>,
    pub prompt_template_file: Option<PathBuf>,
    pub instructions: Option<String>,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_new_tokens: 150,
            stop_sequences: Vec::new(),
            prompt_template: None,
            prompt_template_file: None,
            instructions: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolutionConfig {
    pub notation: Notation,
    pub fallback: FallbackStrategy,
    pub seed: u64,
    /// Try every move-like token of the completion before falling back.
    pub scan_for_legal: bool,
    /// Report insufficient material, fifty-move and threefold repetition
    /// as game over. Checkmate and stalemate always are.
    pub detect_draws: bool,
    /// Append the heuristic summary to forwarded evaluator prompts.
    pub heuristics: bool,
    /// Send the evaluator's own chat messages to the backend instead of
    /// rendering the prompt template.
    pub forward_messages: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            notation: Notation::Uci,
            fallback: FallbackStrategy::First,
            seed: 0,
            scan_for_legal: true,
            detect_draws: false,
            heuristics: false,
            forward_messages: false,
        }
    }
}

impl ResolutionConfig {
    pub fn fallback_policy(&self) -> FallbackPolicy {
        FallbackPolicy::new(self.fallback, self.seed)
    }
}

/// Fields copied into every response. The evaluator's wire contract is
/// not ours to fix, so it lives here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponseConfig {
    pub model: String,
    pub id: String,
    pub object: String,
    pub created: u64,
    /// Assistant content for a move. Placeholders: `{move}`, `{uci}`,
    /// `{san}`, `{rationale}`, `{source}`.
    pub content_template: String,
    /// Assistant content for a finished game. Placeholders: `{reason}`,
    /// `{result}`.
    pub game_over_template: String,
    /// Extra top-level fields merged into every JSON response.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            model: "chess-agent".to_string(),
            id: "chatcmpl-chess-agent".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            content_template: "<think>{rationale}</think>\n<uci_move>{move}</uci_move>"
                .to_string(),
            game_over_template: "<think>The game is over by {reason}.</think>\nGame over: {result}"
                .to_string(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read `path` if given, otherwise start from the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&text)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "model.id is required (pass --model)".to_string(),
            ));
        }
        if self.server.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.response_timeout_ms must be positive".to_string(),
            ));
        }
        if self.model.local.sessions == 0 {
            return Err(ConfigError::Invalid(
                "model.local.sessions must be at least 1".to_string(),
            ));
        }
        if !(0.0..=5.0).contains(&self.decoding.temperature) {
            return Err(ConfigError::Invalid(format!(
                "decoding.temperature {} is out of range",
                self.decoding.temperature
            )));
        }
        Ok(())
    }

    pub fn prompt_template(&self) -> Result<PromptTemplate, ConfigError> {
        let instructions = self
            .decoding
            .instructions
            .clone()
            .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string());
        let template = match (&self.decoding.prompt_template, &self.decoding.prompt_template_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => {
                std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?
            }
            (None, None) => DEFAULT_TEMPLATE.to_string(),
        };
        Ok(PromptTemplate::new(template, instructions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.bind_addr(), "0.0.0.0:5000");
        assert_eq!(config.model.backend, BackendKind::Remote);
        assert_eq!(config.resolution.fallback, FallbackStrategy::First);
        assert!(config.resolution.scan_for_legal);
        assert!(config.validate().is_err(), "model id is required");
    }

    #[test]
    fn parses_full_file() {
        let config = Config::from_toml_str(
            r#"
            [server]
            port = 5001
            response_timeout_ms = 5000

            [model]
            id = "models/maia_rapid.onnx"
            backend = "local"

            [model.local]
            engine = "candle"
            sessions = 4

            [decoding]
            temperature = 0.0
            stop_sequences = ["</uci_move>"]
            prompt_template = "FEN: {fen}"

            [resolution]
            notation = "san"
            fallback = "seeded"
            seed = 7
            detect_draws = true

            [response]
            model = "my-agent"
            extra = { team = "rustaceans", version = 3 }
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.response_timeout(), Duration::from_secs(5));
        assert_eq!(config.model.backend, BackendKind::Local);
        assert_eq!(config.model.local.engine, ExecutionEngine::Candle);
        assert_eq!(config.model.local.sessions, 4);
        assert_eq!(config.decoding.stop_sequences, ["</uci_move>"]);
        assert_eq!(config.resolution.notation, Notation::San);
        assert_eq!(config.resolution.fallback, FallbackStrategy::Seeded);
        assert_eq!(config.response.extra["team"], "rustaceans");
        assert_eq!(config.prompt_template().unwrap().as_str(), "FEN: {fen}");
    }

    #[test]
    fn example_file_is_valid() {
        let config = Config::from_toml_str(include_str!("../chess-agent.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.model.remote.base_url, "http://127.0.0.1:8000");
        assert!(config.response.extra.is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(Config::from_toml_str("[server]\nprot = 1").is_err());
    }
}
