//! Qdrant Cloud Inference embedding client.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{
    check_batch, is_retryable_error, retry_backoff, should_retry, status_error, EmbedError,
    Embedder,
};

/// Default sentence-transformer model served by Qdrant inference.
pub const DEFAULT_QDRANT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Blocking embeddings client that talks to Qdrant Cloud Inference endpoints.
#[derive(Clone)]
pub struct QdrantEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
    batch_size: usize,
}

impl QdrantEmbedder {
    /// Builds a new Qdrant embeddings client.
    ///
    /// # Arguments
    /// * `api_key` - Value for the `api-key` header (usually from `QDRANT_API_KEY` env var)
    /// * `endpoint` - Full inference endpoint, e.g. `https://cluster-id.cloud.qdrant.io/inference/text`
    /// * `model` - Model identifier advertised by the cluster
    pub fn new(
        api_key: &str,
        endpoint: &str,
        model: String,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self, EmbedError> {
        if api_key.trim().is_empty() {
            return Err(EmbedError::Config("missing Qdrant API key".to_string()));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(EmbedError::Config(
                "Qdrant endpoint must be an http(s) URL".to_string(),
            ));
        }
        if model.trim().is_empty() {
            return Err(EmbedError::Config("missing Qdrant model name".to_string()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| EmbedError::Config("invalid Qdrant API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| EmbedError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            max_retries: max_retries.max(1),
            batch_size: batch_size.max(1),
        })
    }
}

impl Embedder for QdrantEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        check_batch(inputs.len(), self.batch_size)?;
        if inputs.iter().any(|input| input.trim().is_empty()) {
            return Err(EmbedError::EmptyInput);
        }

        let mut attempt = 0usize;
        loop {
            let request = InferenceRequest {
                model: &self.model,
                inputs,
            };
            match self.client.post(&self.endpoint).json(&request).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let payload: InferenceResponse = resp
                            .json()
                            .map_err(|err| EmbedError::Malformed(err.to_string()))?;
                        return payload.into_embeddings(inputs.len());
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "retrying Qdrant inference request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(status_error(status, body));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "retrying Qdrant inference request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    data: Vec<InferenceData>,
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl InferenceResponse {
    fn into_embeddings(self, expected_len: usize) -> Result<Vec<Vec<f32>>, EmbedError> {
        let count_error = |actual: usize| {
            EmbedError::Malformed(format!(
                "Qdrant returned {actual} embeddings for {expected_len} inputs"
            ))
        };
        if !self.data.is_empty() {
            if self.data.len() != expected_len {
                return Err(count_error(self.data.len()));
            }
            let mut data = self.data;
            data.sort_by_key(|d| d.index.unwrap_or(0));
            return Ok(data.into_iter().map(|d| d.embedding).collect());
        }
        if !self.embeddings.is_empty() {
            if self.embeddings.len() != expected_len {
                return Err(count_error(self.embeddings.len()));
            }
            return Ok(self.embeddings);
        }
        Err(EmbedError::Malformed(
            "Qdrant response missing embedding payloads".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct InferenceData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}
