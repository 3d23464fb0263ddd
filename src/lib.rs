#![warn(missing_docs)]
//! Question answering over a document collection: load PDFs (plus optional web
//! pages and CSVs), chunk them, index the chunks as embeddings, and answer
//! questions with an LLM grounded in the best matching chunks.

pub mod answerer;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod document;
pub mod embedder;
pub mod embeddings;
pub mod indexer;
pub mod loader;
pub mod providers;
pub mod vector_store;

pub use answerer::{Answer, Citation, ContextBlock, PreparedQuery, QueryAnswerer, QueryError};
pub use chunker::Chunker;
pub use config::{
    ChunkingConfig, ConfigError, EmptyContextPolicy, GenerationConfig, PipelineConfig,
    RetrievalConfig,
};
pub use document::{Chunk, SourceDocument, SourceKind};
pub use embedder::{EmbedError, Embedder};
pub use embeddings::{IndexedRecord, QueryResult, ScoredChunk};
pub use indexer::{index_chunks, index_snapshot, IndexError, IndexReport};
pub use loader::{DocumentLoader, LoadError, LoadReport, SourceSet};
pub use providers::{GenerationError, LlmProvider, ProviderRequest};
pub use vector_store::{LocalVectorStore, StoreError, VectorStore};
