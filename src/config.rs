//! Pipeline configuration shared by the load, index, and query stages.

use std::path::PathBuf;

use clap::ValueEnum;
use thiserror::Error;

/// Default number of whitespace tokens per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
/// Default number of tokens shared by adjacent chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
/// Default number of neighbors retrieved per question.
pub const DEFAULT_TOP_K: usize = 5;
/// Default upper bound on the rendered context block, in characters.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 12_000;

/// Invalid or missing configuration detected at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Chunk size must be at least one token.
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    /// Overlap has to leave room for forward progress.
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge {
        /// Configured overlap.
        overlap: usize,
        /// Configured chunk size.
        size: usize,
    },
    /// Retrieval needs at least one neighbor.
    #[error("top-k must be greater than zero")]
    ZeroTopK,
    /// Context bound of zero would never admit a chunk.
    #[error("max context length must be greater than zero")]
    ZeroContextBound,
    /// Sampling temperature outside the range providers accept.
    #[error("temperature {0} is outside 0.0..=2.0")]
    Temperature(String),
    /// A credential required by the selected backend is absent.
    #[error("{0} must be set")]
    MissingCredential(&'static str),
    /// Free-form validation failure.
    #[error("{0}")]
    Invalid(String),
}

/// Token-window chunking knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Tokens per chunk window.
    pub chunk_size: usize,
    /// Tokens repeated at the start of the following window.
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    /// Checks that the window can always advance.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                overlap: self.chunk_overlap,
                size: self.chunk_size,
            });
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// What the answerer does when retrieval comes back empty.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum EmptyContextPolicy {
    /// Return a fixed "no relevant documents" answer without calling the model.
    #[default]
    Refuse,
    /// Call the model with an explicit note that no context was found.
    AskModel,
}

/// Retrieval and context assembly knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalConfig {
    /// Number of nearest neighbors requested from the store.
    pub top_k: usize,
    /// Upper bound on the rendered context block, in characters.
    pub max_context_chars: usize,
    /// Behavior when no chunk is retrieved.
    pub empty_context: EmptyContextPolicy,
}

impl RetrievalConfig {
    /// Rejects bounds that would make every query degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::ZeroTopK);
        }
        if self.max_context_chars == 0 {
            return Err(ConfigError::ZeroContextBound);
        }
        Ok(())
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            empty_context: EmptyContextPolicy::default(),
        }
    }
}

/// Completion request knobs passed to the LLM provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_completion_tokens: usize,
    /// Optional soft word limit written into the prompt.
    pub max_words: Option<usize>,
}

impl GenerationConfig {
    /// Validates sampling parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Temperature(self.temperature.to_string()));
        }
        if self.max_completion_tokens == 0 {
            return Err(ConfigError::Invalid(
                "max completion tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_completion_tokens: 400,
            max_words: None,
        }
    }
}

/// Embedding backends the pipeline can construct.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// OpenAI-compatible `/embeddings` endpoint.
    #[default]
    Openai,
    /// Qdrant Cloud Inference (sentence-transformer models).
    Qdrant,
    /// Local feature-hashing embedder; no network access.
    Hashing,
}

/// Chat-completion providers the answerer can call.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// OpenAI chat completions.
    #[default]
    Openai,
    /// Anthropic messages API.
    Anthropic,
}

/// Vector collection backends.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Directory-backed JSONL collection.
    #[default]
    Local,
    /// Postgres table with the pgvector extension.
    Pgvector,
}

/// Every option recognized by the pipeline, resolved and validated once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory scanned (non-recursively) for PDF files.
    pub pdf_dir: PathBuf,
    /// Extra web pages to ingest.
    pub urls: Vec<String>,
    /// Extra CSV files to ingest.
    pub csv_paths: Vec<PathBuf>,
    /// JSONL chunk snapshot written by the loader.
    pub snapshot_path: PathBuf,
    /// Directory holding the local vector collection.
    pub store_dir: PathBuf,
    /// Chunk window settings.
    pub chunking: ChunkingConfig,
    /// Retrieval settings.
    pub retrieval: RetrievalConfig,
    /// Completion settings.
    pub generation: GenerationConfig,
    /// Replace records with an existing chunk id instead of appending duplicates.
    pub upsert: bool,
}

impl PipelineConfig {
    /// Validates every nested section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.generation.validate()?;
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("snapshot path is required".to_string()));
        }
        if self.store_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "vector store directory is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pdf_dir: PathBuf::from("data/raw"),
            urls: Vec::new(),
            csv_paths: Vec::new(),
            snapshot_path: PathBuf::from("chunks.jsonl"),
            store_dir: PathBuf::from("vector_store"),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            upsert: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let config = ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 10,
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::OverlapTooLarge {
                overlap: 10,
                size: 10
            })
        );
    }

    #[test]
    fn rejects_zero_top_k() {
        let mut config = PipelineConfig::default();
        config.retrieval.top_k = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTopK));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let config = GenerationConfig {
            temperature: 3.5,
            ..GenerationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Temperature(_))
        ));
    }
}
