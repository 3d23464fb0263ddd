//! Anthropic messages API client.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{read_failure, GenerationError, LlmProvider, ProviderRequest};

/// Default Anthropic API base URL.
pub const DEFAULT_ANTHROPIC_BASE: &str = "https://api.anthropic.com/v1";
/// Default Anthropic model identifier.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20240620";

const NAME: &str = "Anthropic";

/// Anthropic messages API client.
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

impl AnthropicProvider {
    /// Builds a client posting to `{base_url}/messages`.
    pub fn new(
        api_key: String,
        model: String,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::Config(
                "missing Anthropic API key".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                GenerationError::Config(format!("failed to build Anthropic HTTP client: {err}"))
            })?;
        Ok(Self {
            api_key,
            model,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            client,
        })
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, GenerationError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.trim())
                .map_err(|_| GenerationError::Config("invalid Anthropic API key".to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.instruction,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: request.prompt,
                }],
            }],
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
        let parsed: AnthropicResponse = resp.json().map_err(|err| GenerationError::Malformed {
            provider: NAME,
            detail: err.to_string(),
        })?;
        let answer = parsed.text();
        if answer.trim().is_empty() {
            return Err(GenerationError::EmptyAnswer(NAME));
        }
        Ok(answer)
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

impl AnthropicResponse {
    fn text(self) -> String {
        self.content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_blocks_and_skips_others() {
        let parsed: AnthropicResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"First."},{"type":"tool_use","id":"x"},{"type":"text","text":"Second."}]}"#,
        )
        .expect("decode");
        assert_eq!(parsed.text(), "First.\nSecond.");
    }

    #[test]
    fn request_carries_system_instruction() {
        let body = AnthropicRequest {
            model: "m",
            max_tokens: 10,
            temperature: 0.0,
            system: "Only use the context.",
            messages: Vec::new(),
        };
        let json = serde_json::to_value(&body).expect("encode");
        assert_eq!(json["system"], "Only use the context.");
    }

    #[test]
    fn rejects_blank_key() {
        assert!(matches!(
            AnthropicProvider::new(
                "".to_string(),
                DEFAULT_ANTHROPIC_MODEL.to_string(),
                DEFAULT_ANTHROPIC_BASE,
                Duration::from_secs(1)
            ),
            Err(GenerationError::Config(_))
        ));
    }
}
