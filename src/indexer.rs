//! Embeds snapshot chunks and persists them in a vector store.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::document::Chunk;
use crate::embedder::{EmbedError, Embedder};
use crate::embeddings::IndexedRecord;
use crate::loader::{read_snapshot, LoadError};
use crate::vector_store::{StoreError, VectorStore};

/// Fatal indexing failures. Per-chunk problems are skipped, not returned.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Snapshot could not be read.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Embedding service failed after retries.
    #[error("embedding service failed: {0}")]
    Embed(#[source] EmbedError),
    /// Store rejected the write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters returned by one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Chunks embedded and written to the store.
    pub embedded: usize,
    /// Chunks skipped because of item errors.
    pub skipped: usize,
    /// Written chunks that replaced an existing record.
    pub replaced: usize,
}

/// Reads the JSONL snapshot at `snapshot` and indexes every chunk in it.
pub fn index_snapshot(
    snapshot: &Path,
    embedder: &dyn Embedder,
    store: &mut dyn VectorStore,
    upsert: bool,
) -> Result<IndexReport, IndexError> {
    let chunks = read_snapshot(snapshot)?;
    info!(path = %snapshot.display(), chunks = chunks.len(), "loaded chunk snapshot");
    index_chunks(&chunks, embedder, store, upsert)
}

/// Embeds `chunks` in batches of `embedder.batch_size()` and inserts them.
///
/// A batch failing with an item error is retried one chunk at a time and the
/// chunks that still fail are skipped. Service errors abort the run; batches
/// inserted before the failure stay in the store.
pub fn index_chunks(
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    store: &mut dyn VectorStore,
    upsert: bool,
) -> Result<IndexReport, IndexError> {
    let model = embedder.model_id().to_string();
    if let Some(stored) = store.model_id()? {
        if stored != model {
            warn!(stored = %stored, embedder = %model, "collection was built with a different embedding model");
        }
    }

    let batch_size = embedder.batch_size().max(1);
    let mut report = IndexReport::default();
    let mut dimensions: Option<usize> = None;
    for (batch_idx, batch) in chunks.chunks(batch_size).enumerate() {
        let records = embed_batch(batch, embedder, &mut dimensions, &mut report)?;
        if records.is_empty() {
            continue;
        }
        let outcome = store.insert(&records, &model, upsert)?;
        report.embedded += outcome.inserted + outcome.replaced;
        report.replaced += outcome.replaced;
        debug!(
            batch = batch_idx,
            inserted = outcome.inserted,
            replaced = outcome.replaced,
            "stored batch"
        );
    }

    info!(
        embedded = report.embedded,
        skipped = report.skipped,
        replaced = report.replaced,
        model = %model,
        "indexing finished"
    );
    Ok(report)
}

fn embed_batch(
    batch: &[Chunk],
    embedder: &dyn Embedder,
    dimensions: &mut Option<usize>,
    report: &mut IndexReport,
) -> Result<Vec<IndexedRecord>, IndexError> {
    let inputs: Vec<&str> = batch.iter().map(|chunk| chunk.text.as_str()).collect();
    let vectors = match embedder.embed_batch(&inputs) {
        Ok(vectors) if vectors.len() == batch.len() => vectors,
        Ok(vectors) => {
            return Err(IndexError::Embed(EmbedError::Malformed(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            ))))
        }
        Err(err) if err.is_item_error() => {
            debug!(error = %err, size = batch.len(), "batch rejected; embedding chunks one by one");
            return embed_individually(batch, embedder, dimensions, report);
        }
        Err(err) => return Err(IndexError::Embed(err)),
    };

    let mut records = Vec::with_capacity(batch.len());
    for (chunk, embedding) in batch.iter().zip(vectors) {
        match check_dimensions(dimensions, embedding.len()) {
            Ok(()) => records.push(IndexedRecord {
                chunk: chunk.clone(),
                embedding,
            }),
            Err(err) => skip(chunk, &err, report),
        }
    }
    Ok(records)
}

fn embed_individually(
    batch: &[Chunk],
    embedder: &dyn Embedder,
    dimensions: &mut Option<usize>,
    report: &mut IndexReport,
) -> Result<Vec<IndexedRecord>, IndexError> {
    let mut records = Vec::with_capacity(batch.len());
    for chunk in batch {
        let embedded = embedder
            .embed(&chunk.text)
            .and_then(|embedding| check_dimensions(dimensions, embedding.len()).map(|()| embedding));
        match embedded {
            Ok(embedding) => records.push(IndexedRecord {
                chunk: chunk.clone(),
                embedding,
            }),
            Err(err) if err.is_item_error() => skip(chunk, &err, report),
            Err(err) => return Err(IndexError::Embed(err)),
        }
    }
    Ok(records)
}

fn check_dimensions(expected: &mut Option<usize>, actual: usize) -> Result<(), EmbedError> {
    match *expected {
        Some(expected) if expected != actual => Err(EmbedError::DimensionMismatch { expected, actual }),
        Some(_) => Ok(()),
        None => {
            *expected = Some(actual);
            Ok(())
        }
    }
}

fn skip(chunk: &Chunk, err: &EmbedError, report: &mut IndexReport) {
    warn!(chunk = %chunk.id, error = %err, "skipping chunk");
    report.skipped += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::chunker::Chunker;
    use crate::document::{SourceDocument, SourceKind};
    use crate::embedder::HashingEmbedder;
    use crate::vector_store::LocalVectorStore;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn chunks(text: &str) -> Vec<Chunk> {
        let chunker = Chunker::new(ChunkingConfig {
            chunk_size: 4,
            chunk_overlap: 1,
        })
        .expect("chunker");
        chunker.split(&SourceDocument::single("notes.pdf", SourceKind::Pdf, text))
    }

    struct FlakyService {
        inner: HashingEmbedder,
        calls_left: Cell<usize>,
    }

    impl Embedder for FlakyService {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn batch_size(&self) -> usize {
            2
        }

        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            let left = self.calls_left.get();
            if left == 0 {
                return Err(EmbedError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            self.calls_left.set(left - 1);
            self.inner.embed_batch(inputs)
        }
    }

    #[test]
    fn reindexing_with_upsert_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        let embedder = HashingEmbedder::default();
        let chunks = chunks("mangroves store carbon in waterlogged coastal soils for centuries");

        let first = index_chunks(&chunks, &embedder, &mut store, true).expect("index");
        assert_eq!(first.embedded, chunks.len());
        assert_eq!(first.replaced, 0);

        let second = index_chunks(&chunks, &embedder, &mut store, true).expect("reindex");
        assert_eq!(second.replaced, chunks.len());
        assert_eq!(store.len().expect("len"), chunks.len());

        index_chunks(&chunks, &embedder, &mut store, false).expect("append");
        assert_eq!(store.len().expect("len"), chunks.len() * 2);
    }

    #[test]
    fn item_errors_are_skipped_without_failing_the_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        let mut chunks = chunks("coral reefs protect shorelines from storm surge");
        // Punctuation only: no tokens for the hashing embedder.
        chunks[1].text = "-- ... --".to_string();

        let report =
            index_chunks(&chunks, &HashingEmbedder::default(), &mut store, true).expect("index");
        assert_eq!(report.skipped, 1);
        assert_eq!(report.embedded, chunks.len() - 1);
        assert_eq!(store.len().expect("len"), chunks.len() - 1);
    }

    #[test]
    fn service_errors_abort() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        let embedder = FlakyService {
            inner: HashingEmbedder::default(),
            calls_left: Cell::new(1),
        };
        let chunks = chunks("one two three four five six seven eight nine ten eleven twelve");
        assert!(chunks.len() > 2);

        let err = index_chunks(&chunks, &embedder, &mut store, true).expect_err("must fail");
        assert!(matches!(err, IndexError::Embed(EmbedError::Status { status: 503, .. })));
        // The first batch was persisted before the outage.
        assert_eq!(store.len().expect("len"), 2);
    }

    #[test]
    fn dimension_drift_is_an_item_error() {
        let mut dims = None;
        assert!(check_dimensions(&mut dims, 8).is_ok());
        let err = check_dimensions(&mut dims, 4).expect_err("mismatch");
        assert!(err.is_item_error());
    }
}
