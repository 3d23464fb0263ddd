//! Local feature-hashing embedder.
//!
//! Lowercased alphanumeric tokens (minus a short stopword list) are hashed with
//! CRC32 into `dimensions` signed buckets and the result is L2-normalized. It is
//! deterministic, needs no network, and shared vocabulary drives similarity, so
//! it works for offline runs and tests.

use super::{check_batch, EmbedError, Embedder};

/// Dimension matching common sentence-transformer models.
pub const DEFAULT_HASHING_DIMENSIONS: usize = 384;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "in",
    "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when", "which",
    "who", "why", "with",
];

/// Deterministic bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl HashingEmbedder {
    /// Builds an embedder producing `dimensions`-long vectors.
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            model: format!("hashing-crc32-{dimensions}"),
            dimensions,
            batch_size: 64,
        }
    }

    /// Vector length produced by this embedder.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0f32; self.dimensions];
        let mut tokens = 0usize;
        for token in text
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let token = token.to_lowercase();
            if STOPWORDS.contains(&token.as_str()) {
                continue;
            }
            let hash = crc32fast::hash(token.as_bytes());
            let bucket = (hash as usize) % self.dimensions;
            let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
            tokens += 1;
        }
        if tokens == 0 {
            return Err(EmbedError::EmptyInput);
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            // Colliding tokens with opposite signs cancelled out.
            return Err(EmbedError::EmptyInput);
        }
        for value in &mut vector {
            *value /= norm;
        }
        Ok(vector)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSIONS)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        check_batch(inputs.len(), self.batch_size)?;
        inputs.iter().map(|input| self.embed_one(input)).collect()
    }
}
