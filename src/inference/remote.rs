use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{GenerationRequest, InferenceBackend, truncate_at_stop};
use crate::config::RemoteSettings;
use crate::error::InferenceError;
use crate::types::ChatMessage;

/// Client for an OpenAI-compatible `/v1/chat/completions` server, such as
/// a vLLM or llama.cpp instance hosting the agent's language model.
pub struct RemoteBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChatMessage>,
    /// Legacy completions shape.
    text: Option<String>,
}

impl RemoteBackend {
    pub fn new(model: &str, settings: &RemoteSettings) -> Result<Self, InferenceError> {
        let timeout = Duration::from_millis(settings.request_timeout_ms);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1/chat/completions",
                settings.base_url.trim_end_matches('/')
            ),
            model: model.to_string(),
            timeout,
        })
    }

    fn request_error(&self, err: reqwest::Error) -> InferenceError {
        if err.is_timeout() {
            InferenceError::Timeout(self.timeout)
        } else {
            InferenceError::Http(err)
        }
    }
}

#[async_trait]
impl InferenceBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferenceError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.options.temperature,
            max_tokens: request.options.max_new_tokens,
            stop: Some(request.options.stop_sequences.as_slice()).filter(|s| !s.is_empty()),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Unavailable(format!(
                "{} answered {status}",
                self.endpoint
            )));
        }

        let completion: CompletionResponse =
            response.json().await.map_err(|e| self.request_error(e))?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.map(|m| m.content).or(c.text))
            .unwrap_or_default();
        debug!(chars = text.len(), "completion received");

        Ok(truncate_at_stop(text, &request.options.stop_sequences))
    }
}
