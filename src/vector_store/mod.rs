//! Persistent vector collections supporting cosine nearest-neighbor search.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::embeddings::{IndexedRecord, ScoredChunk};

pub mod local;
pub mod postgres;

pub use local::LocalVectorStore;
pub use postgres::{PgVectorStore, TableName};

/// Errors raised by vector store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure inside the store directory.
    #[error("vector store i/o error at {path:?}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A persisted record or manifest did not decode.
    #[error("corrupt vector store file {path:?} at line {line}: {source}")]
    Corrupt {
        /// File involved.
        path: PathBuf,
        /// 1-based line number (1 for whole-file documents).
        line: usize,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Vector length does not match the collection.
    #[error("vector has {actual} dimensions but the collection stores {expected}")]
    DimensionMismatch {
        /// Collection dimension.
        expected: usize,
        /// Offending vector length.
        actual: usize,
    },
    /// Postgres reported an error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    /// Invalid store settings.
    #[error("invalid vector store configuration: {0}")]
    Config(String),
}

/// Rows written by one insert call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Rows added.
    pub inserted: usize,
    /// Existing rows overwritten (upsert only).
    pub replaced: usize,
}

/// Append-oriented vector collection.
///
/// Every backend scores with cosine similarity so scores stay comparable
/// between index time and query time.
pub trait VectorStore {
    /// Number of records currently stored.
    fn len(&self) -> Result<usize, StoreError>;

    /// True when the collection holds no records.
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Embedding model recorded for the collection, if known.
    fn model_id(&self) -> Result<Option<String>, StoreError>;

    /// Persists records. With `upsert`, a record whose chunk id already exists
    /// replaces the stored one; otherwise records are appended.
    fn insert(
        &mut self,
        records: &[IndexedRecord],
        model_id: &str,
        upsert: bool,
    ) -> Result<InsertOutcome, StoreError>;

    /// Returns at most `k` records ordered by non-increasing similarity.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Removes every record.
    fn clear(&mut self) -> Result<(), StoreError>;
}

impl<S: VectorStore + ?Sized> VectorStore for Box<S> {
    fn len(&self) -> Result<usize, StoreError> {
        (**self).len()
    }

    fn model_id(&self) -> Result<Option<String>, StoreError> {
        (**self).model_id()
    }

    fn insert(
        &mut self,
        records: &[IndexedRecord],
        model_id: &str,
        upsert: bool,
    ) -> Result<InsertOutcome, StoreError> {
        (**self).insert(records, model_id, upsert)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        (**self).search(query, k)
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        (**self).clear()
    }
}
