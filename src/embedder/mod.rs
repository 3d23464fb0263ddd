//! Embedding clients that turn chunk text into dense vectors.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

pub mod hashing;
pub mod openai;
pub mod qdrant;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;
pub use qdrant::QdrantEmbedder;

/// Errors produced while computing embeddings.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Client construction failed (missing key, bad endpoint).
    #[error("embedder configuration error: {0}")]
    Config(String),
    /// Input contained nothing the model can embed.
    #[error("input has no embeddable content")]
    EmptyInput,
    /// The service rejected the input itself (e.g. too long).
    #[error("embedding input rejected ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Vector length differs from the collection's dimension.
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Produced dimension.
        actual: usize,
    },
    /// Caller passed more inputs than the client's batch size.
    #[error("batch of {len} exceeds configured max {max}")]
    BatchTooLarge {
        /// Inputs supplied.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Network failure after retries.
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success status after retries.
    #[error("embedding service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Response body did not match the expected shape.
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl EmbedError {
    /// True when the failure is attributable to one input rather than the service.
    pub fn is_item_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput | Self::Rejected { .. } | Self::DimensionMismatch { .. }
        )
    }
}

/// Maps text to fixed-length vectors; any implementation is substitutable.
pub trait Embedder {
    /// Model identifier recorded alongside stored vectors.
    fn model_id(&self) -> &str;

    /// Maximum inputs accepted by one [`Embedder::embed_batch`] call.
    fn batch_size(&self) -> usize;

    /// Embeds `inputs`, returning one vector per input in the same order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embeds a single string.
    fn embed(&self, input: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed_batch(&[input])?
            .pop()
            .ok_or_else(|| EmbedError::Malformed("no embedding returned".to_string()))
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn batch_size(&self) -> usize {
        (**self).batch_size()
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        (**self).embed_batch(inputs)
    }
}

pub(crate) fn check_batch(len: usize, max: usize) -> Result<(), EmbedError> {
    if len > max {
        return Err(EmbedError::BatchTooLarge { len, max });
    }
    Ok(())
}

pub(crate) fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

pub(crate) fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

/// Classifies a final non-success response.
pub(crate) fn status_error(status: StatusCode, body: String) -> EmbedError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            EmbedError::Rejected {
                status: status.as_u16(),
                body,
            }
        }
        _ => EmbedError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_on_input_are_item_errors() {
        assert!(status_error(StatusCode::BAD_REQUEST, String::new()).is_item_error());
        assert!(!status_error(StatusCode::UNAUTHORIZED, String::new()).is_item_error());
        assert!(!status_error(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_item_error());
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(9), retry_backoff(5));
    }

    #[test]
    fn retries_rate_limits_and_server_errors() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
    }
}
