//! HTTP surface.
//!
//! - `POST /move`: FEN plus move history in, move out.
//! - `POST /v1/chat/completions`: OpenAI-compatible; the position is read
//!   from the last user message.
//! - `GET /health`.
//!
//! Handlers share one read-only [`AppState`]; requests never see each
//! other.

pub mod protocol;

use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};

use crate::board::BoardState;
use crate::config::{Config, ResponseConfig};
use crate::error::ConfigError;
use crate::inference::InferenceBackend;
use crate::resolver::{MoveResolver, Overrides};
use crate::types::{Notation, Resolution};

use protocol::{
    ChatRequest, MoveRequest, MoveResponse, chat_completion, merge_extra,
    render_game_over_content, render_move_content,
};

pub struct AppState {
    pub resolver: MoveResolver,
    pub response: ResponseConfig,
    pub notation: Notation,
}

impl AppState {
    pub fn new(resolver: MoveResolver, response: ResponseConfig, notation: Notation) -> Self {
        Self {
            resolver,
            response,
            notation,
        }
    }

    pub fn from_config(
        backend: Arc<dyn InferenceBackend>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            MoveResolver::from_config(backend, config)?,
            config.response.clone(),
            config.resolution.notation,
        ))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/move", post(play_move))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": message.into()}))).into_response()
}

/// Decode a JSON body without axum's rejection format, so every client
/// error has the same `{"error": …}` shape.
fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}")))
}

#[instrument(skip_all)]
async fn play_move(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    debug!(stage = "received", bytes = body.len());
    let request: MoveRequest = match decode(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let board = match BoardState::from_fen_and_moves(request.fen.as_deref(), &request.moves) {
        Ok(board) => board,
        Err(err) => {
            warn!(error = %err, "rejected position");
            return error_response(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    let overrides = Overrides {
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    };
    let body = match state.resolver.resolve(&board, None, overrides).await {
        Resolution::Move(mv) => MoveResponse::resolved(&mv, state.notation),
        Resolution::GameOver(termination) => MoveResponse::game_over(termination),
    };
    debug!(stage = "responded");

    match serde_json::to_value(body) {
        Ok(value) => Json(merge_extra(value, &state.response.extra)).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[instrument(skip_all)]
async fn chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    debug!(stage = "received", bytes = body.len());
    let request: ChatRequest = match decode(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if request.messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "'messages' field is required");
    }

    let overrides = Overrides {
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    };
    let board = request.fen().and_then(|fen| match BoardState::from_fen(fen) {
        Ok(board) => Some(board),
        Err(err) => {
            warn!(error = %err, fen, "ignoring unusable FEN in prompt");
            None
        }
    });

    let (content, finish_reason, game_over) = match board {
        Some(board) => {
            match state
                .resolver
                .resolve(&board, Some(&request.messages), overrides)
                .await
            {
                Resolution::Move(mv) => (
                    render_move_content(&state.response, &mv, state.notation),
                    "stop",
                    None,
                ),
                Resolution::GameOver(termination) => (
                    render_game_over_content(&state.response, &termination),
                    "game_over",
                    Some(termination),
                ),
            }
        }
        // Nothing to validate against: hand the conversation to the model
        // and return whatever it says.
        None => match state.resolver.passthrough(&request.messages, overrides).await {
            Ok(text) => (text, "stop", None),
            Err(err) => {
                warn!(error = %err, "passthrough failed");
                return error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string());
            }
        },
    };
    debug!(stage = "responded");

    let mut value = chat_completion(&state.response, content, finish_reason, request.word_count());
    if let (Some(termination), Value::Object(object)) = (game_over, &mut value) {
        object.insert("game_over".to_string(), json!(termination));
    }
    Json(merge_extra(value, &state.response.extra)).into_response()
}
