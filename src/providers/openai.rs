//! OpenAI chat completions client.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{read_failure, GenerationError, LlmProvider, ProviderRequest};
use crate::embedder::openai::DEFAULT_OPENAI_BASE;

/// Default chat model for answer synthesis.
pub const DEFAULT_OPENAI_CHAT_MODEL: &str = "gpt-4o-mini";

const NAME: &str = "OpenAI";

/// OpenAI chat-completions client.
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

impl OpenAiProvider {
    /// Client against the public OpenAI API.
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, GenerationError> {
        Self::with_base_url(api_key, model, DEFAULT_OPENAI_BASE, timeout)
    }

    /// Client against an OpenAI-compatible endpoint.
    pub fn with_base_url(
        api_key: String,
        model: String,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::Config("missing OpenAI API key".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GenerationError::Config(format!("failed to build OpenAI HTTP client: {err}")))?;
        Ok(Self {
            api_key,
            model,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            client,
        })
    }
}

impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, GenerationError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| GenerationError::Config("invalid OpenAI API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.instruction,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .map_err(|source| GenerationError::Transport {
                provider: NAME,
                source,
            })?;
        if !resp.status().is_success() {
            return Err(read_failure(NAME, resp));
        }
        let parsed: ChatResponse = resp.json().map_err(|err| GenerationError::Malformed {
            provider: NAME,
            detail: err.to_string(),
        })?;
        parsed
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .find(|content| !content.trim().is_empty())
            .ok_or(GenerationError::EmptyAnswer(NAME))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}
