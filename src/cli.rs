//! Command-line surface for the `docqa` binary.
//!
//! Every option can also be supplied through a `DOCQA_*` environment variable;
//! API keys come from the providers' conventional variables.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    ChunkingConfig, ConfigError, EmbedderKind, EmptyContextPolicy, GenerationConfig,
    PipelineConfig, ProviderKind, RetrievalConfig, StoreKind, DEFAULT_CHUNK_OVERLAP,
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_TOP_K,
};
use crate::embedder::hashing::DEFAULT_HASHING_DIMENSIONS;
use crate::embedder::openai::{DEFAULT_OPENAI_BASE, DEFAULT_OPENAI_EMBEDDING_MODEL};
use crate::embedder::qdrant::DEFAULT_QDRANT_MODEL;
use crate::embedder::{Embedder, HashingEmbedder, OpenAiEmbedder, QdrantEmbedder};
use crate::loader::SourceSet;
use crate::providers::{
    AnthropicProvider, LlmProvider, OpenAiProvider, DEFAULT_ANTHROPIC_BASE,
    DEFAULT_ANTHROPIC_MODEL, DEFAULT_OPENAI_CHAT_MODEL,
};
use crate::vector_store::{LocalVectorStore, PgVectorStore, StoreError, TableName, VectorStore};

/// Top-level parser.
#[derive(Parser, Debug)]
#[command(
    name = "docqa",
    version,
    about = "Load documents, index them as embeddings, and answer questions with citations"
)]
pub struct Cli {
    /// Stage to run
    #[command(subcommand)]
    pub command: Command,
}

/// Pipeline stages.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract and chunk PDFs (plus optional URLs/CSVs) into a JSONL snapshot
    Load(LoadArgs),
    /// Embed a snapshot and write it to the vector store
    Index(IndexArgs),
    /// Answer a question from the indexed collection
    Query(QueryArgs),
    /// Load, index, and optionally answer a question in one go
    Run(RunArgs),
}

/// Arguments of `docqa load`.
#[derive(Args, Debug)]
pub struct LoadArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub sources: SourceArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub snapshot: SnapshotArgs,
}

/// Arguments of `docqa index`.
#[derive(Args, Debug)]
pub struct IndexArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub snapshot: SnapshotArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub embedder: EmbedderArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub store: StoreArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub write: WriteArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub credentials: CredentialArgs,
}

/// Arguments of `docqa query`.
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Question to answer
    pub question: String,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub embedder: EmbedderArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub store: StoreArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub retrieval: RetrievalArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub generation: GenerationArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub credentials: CredentialArgs,
}

/// Arguments of `docqa run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Question to answer once indexing finishes
    #[arg(long)]
    pub question: Option<String>,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub sources: SourceArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub snapshot: SnapshotArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub embedder: EmbedderArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub store: StoreArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub write: WriteArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub retrieval: RetrievalArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub generation: GenerationArgs,
    #[command(flatten)]
    #[allow(missing_docs)]
    pub credentials: CredentialArgs,
}

/// Input sources and chunk window.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Directory scanned (non-recursively) for PDF files
    #[arg(long, env = "DOCQA_PDF_DIR", default_value = "data/raw")]
    pub pdf_dir: PathBuf,

    /// Web pages to ingest, comma separated
    #[arg(long = "url", env = "DOCQA_URLS", value_delimiter = ',')]
    pub urls: Vec<String>,

    /// CSV files to ingest, comma separated
    #[arg(long = "csv", env = "DOCQA_CSV", value_delimiter = ',')]
    pub csv_paths: Vec<PathBuf>,

    /// Tokens per chunk
    #[arg(long, env = "DOCQA_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Tokens shared between consecutive chunks
    #[arg(long, env = "DOCQA_CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,
}

impl SourceArgs {
    /// Sources handed to the loader.
    pub fn source_set(&self) -> SourceSet {
        SourceSet {
            pdf_dir: self.pdf_dir.clone(),
            urls: self.urls.clone(),
            csv_paths: self.csv_paths.clone(),
        }
    }

    /// Chunk window settings.
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

/// Location of the chunk snapshot.
#[derive(Args, Debug, Clone)]
pub struct SnapshotArgs {
    /// JSONL chunk snapshot written by `load` and read by `index`
    #[arg(long, env = "DOCQA_SNAPSHOT", default_value = "chunks.jsonl")]
    pub snapshot: PathBuf,
}

/// API keys, read from the providers' usual environment variables.
#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// OpenAI API key (embeddings and/or answers)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Anthropic API key (required for --llm-provider anthropic)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Qdrant Cloud API key (required for --embedder qdrant)
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,
}

fn require<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingCredential(name))
}

/// Embedding backend selection.
#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    /// Embedding backend
    #[arg(long, env = "DOCQA_EMBEDDER", value_enum, default_value_t = EmbedderKind::Openai)]
    pub embedder: EmbedderKind,

    /// Embedding model (defaults to the backend's standard model)
    #[arg(long, env = "DOCQA_EMBED_MODEL")]
    pub embedding_model: Option<String>,

    /// Optional dimension override for OpenAI models that support it
    #[arg(long, env = "DOCQA_EMBED_DIMENSIONS")]
    pub embedding_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible API
    #[arg(long, env = "DOCQA_OPENAI_BASE", default_value = DEFAULT_OPENAI_BASE)]
    pub openai_base_url: String,

    /// Qdrant inference endpoint (https://<cluster>/inference/text)
    #[arg(long, env = "DOCQA_QDRANT_ENDPOINT")]
    pub qdrant_endpoint: Option<String>,

    /// Vector length of the local hashing embedder
    #[arg(long, env = "DOCQA_HASHING_DIMENSIONS", default_value_t = DEFAULT_HASHING_DIMENSIONS)]
    pub hashing_dimensions: usize,

    /// Max chunks per embedding request
    #[arg(long, env = "DOCQA_EMBED_BATCH", default_value_t = 32)]
    pub embed_batch_size: usize,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "DOCQA_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    pub embed_timeout_secs: u64,

    /// Attempts per request for rate limits or transient errors
    #[arg(long, env = "DOCQA_EMBED_MAX_RETRIES", default_value_t = 5)]
    pub embed_max_retries: usize,
}

impl EmbedderArgs {
    /// Constructs the selected embedder, failing fast on a missing key.
    pub fn build(&self, credentials: &CredentialArgs) -> Result<Box<dyn Embedder>, ConfigError> {
        let timeout = Duration::from_secs(self.embed_timeout_secs.max(1));
        let batch_size = self.embed_batch_size.max(1);
        let embedder: Box<dyn Embedder> = match self.embedder {
            EmbedderKind::Openai => {
                let key = require(&credentials.openai_api_key, "OPENAI_API_KEY")?;
                let model = self
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_EMBEDDING_MODEL.to_string());
                Box::new(
                    OpenAiEmbedder::new(
                        key,
                        &self.openai_base_url,
                        model,
                        self.embedding_dimensions,
                        timeout,
                        self.embed_max_retries,
                        batch_size,
                    )
                    .map_err(|err| ConfigError::Invalid(err.to_string()))?,
                )
            }
            EmbedderKind::Qdrant => {
                let key = require(&credentials.qdrant_api_key, "QDRANT_API_KEY")?;
                let endpoint = require(&self.qdrant_endpoint, "DOCQA_QDRANT_ENDPOINT")?;
                let model = self
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_QDRANT_MODEL.to_string());
                Box::new(
                    QdrantEmbedder::new(
                        key,
                        endpoint,
                        model,
                        timeout,
                        self.embed_max_retries,
                        batch_size,
                    )
                    .map_err(|err| ConfigError::Invalid(err.to_string()))?,
                )
            }
            EmbedderKind::Hashing => {
                if self.hashing_dimensions == 0 {
                    return Err(ConfigError::Invalid(
                        "hashing dimensions must be greater than zero".to_string(),
                    ));
                }
                Box::new(HashingEmbedder::new(self.hashing_dimensions))
            }
        };
        Ok(embedder)
    }
}

/// Vector store selection.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Vector store backend
    #[arg(long, env = "DOCQA_STORE", value_enum, default_value_t = StoreKind::Local)]
    pub store: StoreKind,

    /// Directory holding the local collection
    #[arg(long, env = "DOCQA_STORE_DIR", default_value = "vector_store")]
    pub store_dir: PathBuf,

    /// Postgres connection string (postgres://...) for --store pgvector
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Schema of the pgvector table
    #[arg(long, env = "DOCQA_PGVECTOR_SCHEMA", default_value = "public")]
    pub pg_schema: String,

    /// Name of the pgvector table
    #[arg(long, env = "DOCQA_PGVECTOR_TABLE", default_value = "docqa_chunks")]
    pub pg_table: String,
}

impl StoreArgs {
    /// Opens (or connects to) the selected store.
    pub fn open(&self) -> Result<Box<dyn VectorStore>, StoreError> {
        match self.store {
            StoreKind::Local => Ok(Box::new(LocalVectorStore::open(&self.store_dir)?)),
            StoreKind::Pgvector => {
                let url = self
                    .database_url
                    .as_deref()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| {
                        StoreError::Config("DATABASE_URL must be set for --store pgvector".to_string())
                    })?;
                let table = TableName::new(self.pg_schema.clone(), self.pg_table.clone())?;
                Ok(Box::new(PgVectorStore::connect(url, table)?))
            }
        }
    }
}

/// Insert behavior for indexing.
#[derive(Args, Debug, Clone, Copy)]
pub struct WriteArgs {
    /// Append records even when their chunk id is already stored
    #[arg(long, env = "DOCQA_NO_UPSERT", default_value_t = false)]
    pub no_upsert: bool,

    /// Remove every stored record before indexing
    #[arg(long, default_value_t = false)]
    pub reset: bool,
}

/// Retrieval and context bounds.
#[derive(Args, Debug, Clone, Copy)]
pub struct RetrievalArgs {
    /// Number of chunks retrieved per question
    #[arg(long, env = "DOCQA_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Upper bound on the rendered context block, in characters
    #[arg(long, env = "DOCQA_MAX_CONTEXT_CHARS", default_value_t = DEFAULT_MAX_CONTEXT_CHARS)]
    pub max_context_chars: usize,

    /// What to do when nothing relevant is retrieved
    #[arg(long, env = "DOCQA_EMPTY_CONTEXT", value_enum, default_value_t = EmptyContextPolicy::Refuse)]
    pub empty_context: EmptyContextPolicy,
}

impl RetrievalArgs {
    /// Retrieval settings.
    pub fn retrieval(&self) -> RetrievalConfig {
        RetrievalConfig {
            top_k: self.top_k,
            max_context_chars: self.max_context_chars,
            empty_context: self.empty_context,
        }
    }
}

/// Answer model selection and sampling.
#[derive(Args, Debug, Clone)]
pub struct GenerationArgs {
    /// Target LLM provider
    #[arg(long, env = "DOCQA_LLM_PROVIDER", value_enum, default_value_t = ProviderKind::Openai)]
    pub llm_provider: ProviderKind,

    /// OpenAI chat model used for synthesis
    #[arg(long, env = "DOCQA_OPENAI_MODEL", default_value = DEFAULT_OPENAI_CHAT_MODEL)]
    pub openai_model: String,

    /// Anthropic model identifier
    #[arg(long, env = "DOCQA_ANTHROPIC_MODEL", default_value = DEFAULT_ANTHROPIC_MODEL)]
    pub anthropic_model: String,

    /// Base URL for the Anthropic API
    #[arg(long, env = "DOCQA_ANTHROPIC_BASE", default_value = DEFAULT_ANTHROPIC_BASE)]
    pub anthropic_base_url: String,

    /// Base URL for OpenAI-compatible chat completions
    #[arg(long, env = "DOCQA_OPENAI_CHAT_BASE", default_value = DEFAULT_OPENAI_BASE)]
    pub openai_chat_base_url: String,

    /// Max seconds to wait for the answer
    #[arg(long, env = "DOCQA_LLM_TIMEOUT_SECS", default_value_t = 60)]
    pub llm_timeout_secs: u64,

    /// Sampling temperature for the answer model
    #[arg(long, env = "DOCQA_TEMPERATURE", default_value_t = 0.2)]
    pub temperature: f32,

    /// Maximum tokens to request from the completion model
    #[arg(long, env = "DOCQA_MAX_COMPLETION_TOKENS", default_value_t = 400)]
    pub max_completion_tokens: usize,

    /// Optional max words constraint included in the prompt
    #[arg(long, env = "DOCQA_MAX_WORDS")]
    pub max_words: Option<usize>,

    /// Only print the rendered context and prompt (skip the LLM call)
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

impl GenerationArgs {
    /// Completion settings.
    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            max_completion_tokens: self.max_completion_tokens,
            max_words: self.max_words,
        }
    }

    /// Constructs the selected provider, failing fast on a missing key.
    pub fn build_provider(
        &self,
        credentials: &CredentialArgs,
    ) -> Result<Box<dyn LlmProvider>, ConfigError> {
        let timeout = Duration::from_secs(self.llm_timeout_secs.max(1));
        let provider: Box<dyn LlmProvider> = match self.llm_provider {
            ProviderKind::Openai => {
                let key = require(&credentials.openai_api_key, "OPENAI_API_KEY")?;
                Box::new(
                    OpenAiProvider::with_base_url(
                        key.to_string(),
                        self.openai_model.clone(),
                        &self.openai_chat_base_url,
                        timeout,
                    )
                    .map_err(|err| ConfigError::Invalid(err.to_string()))?,
                )
            }
            ProviderKind::Anthropic => {
                let key = require(&credentials.anthropic_api_key, "ANTHROPIC_API_KEY")?;
                Box::new(
                    AnthropicProvider::new(
                        key.to_string(),
                        self.anthropic_model.clone(),
                        &self.anthropic_base_url,
                        timeout,
                    )
                    .map_err(|err| ConfigError::Invalid(err.to_string()))?,
                )
            }
        };
        Ok(provider)
    }
}

impl Cli {
    /// Resolves the options relevant to the chosen command into a validated config.
    ///
    /// Sections the command does not use keep their defaults.
    pub fn build_config(&self) -> Result<PipelineConfig, ConfigError> {
        let mut config = PipelineConfig::default();
        match &self.command {
            Command::Load(args) => {
                apply_sources(&mut config, &args.sources);
                config.snapshot_path = args.snapshot.snapshot.clone();
            }
            Command::Index(args) => {
                config.snapshot_path = args.snapshot.snapshot.clone();
                config.store_dir = args.store.store_dir.clone();
                config.upsert = !args.write.no_upsert;
            }
            Command::Query(args) => {
                config.store_dir = args.store.store_dir.clone();
                config.retrieval = args.retrieval.retrieval();
                config.generation = args.generation.generation();
            }
            Command::Run(args) => {
                apply_sources(&mut config, &args.sources);
                config.snapshot_path = args.snapshot.snapshot.clone();
                config.store_dir = args.store.store_dir.clone();
                config.upsert = !args.write.no_upsert;
                config.retrieval = args.retrieval.retrieval();
                config.generation = args.generation.generation();
            }
        }
        config.validate()?;
        Ok(config)
    }
}

fn apply_sources(config: &mut PipelineConfig, sources: &SourceArgs) {
    config.pdf_dir = sources.pdf_dir.clone();
    config.urls = sources.urls.clone();
    config.csv_paths = sources.csv_paths.clone();
    config.chunking = sources.chunking();
}
