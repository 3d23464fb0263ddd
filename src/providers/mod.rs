//! Hosted chat-completion providers.

use thiserror::Error;

mod anthropic;
mod openai;

pub use anthropic::{AnthropicProvider, DEFAULT_ANTHROPIC_BASE, DEFAULT_ANTHROPIC_MODEL};
pub use openai::{OpenAiProvider, DEFAULT_OPENAI_CHAT_MODEL};

/// Failures while generating an answer.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Client construction failed.
    #[error("provider configuration error: {0}")]
    Config(String),
    /// Network failure.
    #[error("failed to reach {provider}: {source}")]
    Transport {
        /// Provider name.
        provider: &'static str,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// Non-success HTTP status.
    #[error("{provider} returned {status}: {body}")]
    Status {
        /// Provider name.
        provider: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Body did not match the provider's schema.
    #[error("failed to parse {provider} response: {detail}")]
    Malformed {
        /// Provider name.
        provider: &'static str,
        /// Decoder message.
        detail: String,
    },
    /// Response contained no answer text.
    #[error("{0} response missing text content")]
    EmptyAnswer(&'static str),
}

/// Request envelope shared by the various providers.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    /// Fixed system instruction.
    pub instruction: &'a str,
    /// User prompt carrying the context block and question.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: usize,
}

/// Trait implemented by concrete LLM providers.
pub trait LlmProvider {
    /// Short provider name used in logs.
    fn name(&self) -> &'static str;

    /// Returns the model's answer text for `request`.
    fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, GenerationError>;
}

impl<P: LlmProvider + ?Sized> LlmProvider for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, GenerationError> {
        (**self).answer(request)
    }
}

fn read_failure(provider: &'static str, resp: reqwest::blocking::Response) -> GenerationError {
    let status = resp.status().as_u16();
    let body = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    GenerationError::Status {
        provider,
        status,
        body,
    }
}
