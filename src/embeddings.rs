//! Shared embedding data structures used across pipeline stages.

use serde::{Deserialize, Serialize};

use crate::document::Chunk;

/// Chunk paired with its embedding; the unit persisted in vector stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    /// Chunk exactly as the loader emitted it.
    pub chunk: Chunk,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
}

/// Retrieved chunk with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    /// Stored chunk.
    pub chunk: Chunk,
    /// Cosine similarity, higher is closer.
    pub score: f32,
}

/// Nearest neighbors for one query, ordered by non-increasing score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Hits, best first; never longer than the requested `k`.
    pub hits: Vec<ScoredChunk>,
}

impl QueryResult {
    /// Number of hits.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// True when nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Cosine similarity; `None` for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some((dot / denom) as f32)
}
