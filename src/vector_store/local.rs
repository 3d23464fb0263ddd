//! Directory-backed vector collection with exhaustive cosine search.
//!
//! Layout: `collection.json` (dimension, model, metric) and `records.jsonl`
//! (one [`IndexedRecord`] per line). Everything is loaded into memory on open.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{InsertOutcome, StoreError, VectorStore};
use crate::embeddings::{cosine_similarity, IndexedRecord, ScoredChunk};

const MANIFEST_FILE: &str = "collection.json";
const RECORDS_FILE: &str = "records.jsonl";

/// Collection-level metadata persisted next to the records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionManifest {
    /// Vector dimension fixed by the first insert.
    pub dimensions: usize,
    /// Embedding model that produced the stored vectors.
    pub model: String,
    /// Similarity metric; always `cosine`.
    pub metric: String,
    /// Creation timestamp (ms since epoch).
    pub created_epoch_ms: u64,
}

/// On-disk collection loaded fully into memory.
#[derive(Debug)]
pub struct LocalVectorStore {
    dir: PathBuf,
    manifest: Option<CollectionManifest>,
    records: Vec<IndexedRecord>,
    positions: HashMap<String, usize>,
}

impl LocalVectorStore {
    /// Opens (creating if needed) the collection stored in `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = match fs::read_to_string(&manifest_path) {
            Ok(raw) => Some(serde_json::from_str(&raw).map_err(|source| {
                StoreError::Corrupt {
                    path: manifest_path.clone(),
                    line: 1,
                    source,
                }
            })?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(source) => return Err(io_error(&manifest_path, source)),
        };

        let records = read_records(&dir.join(RECORDS_FILE))?;
        let mut positions = HashMap::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            positions.insert(record.chunk.id.clone(), idx);
        }
        debug!(dir = %dir.display(), records = records.len(), "opened local vector store");
        Ok(Self {
            dir,
            manifest,
            records,
            positions,
        })
    }

    /// Directory backing this collection.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Collection metadata, once the first record has been inserted.
    pub fn manifest(&self) -> Option<&CollectionManifest> {
        self.manifest.as_ref()
    }

    fn records_path(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    fn write_manifest(&self, manifest: &CollectionManifest) -> Result<(), StoreError> {
        let path = self.dir.join(MANIFEST_FILE);
        let raw = serde_json::to_string_pretty(manifest).map_err(|err| io_error(&path, err.into()))?;
        fs::write(&path, raw).map_err(|source| io_error(&path, source))
    }

    fn append(&self, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let path = self.records_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;
        write_records(&path, file, records)
    }

    fn rewrite(&self, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let path = self.records_path();
        let tmp = self.dir.join(format!("{RECORDS_FILE}.tmp"));
        let file = File::create(&tmp).map_err(|source| io_error(&tmp, source))?;
        write_records(&tmp, file, records)?;
        fs::rename(&tmp, &path).map_err(|source| io_error(&path, source))
    }

    fn check_dimensions(&self, expected: usize, vectors: &[&[f32]]) -> Result<(), StoreError> {
        for vector in vectors {
            if vector.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        Ok(())
    }
}

impl VectorStore for LocalVectorStore {
    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }

    fn model_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.manifest.as_ref().map(|m| m.model.clone()))
    }

    fn insert(
        &mut self,
        records: &[IndexedRecord],
        model_id: &str,
        upsert: bool,
    ) -> Result<InsertOutcome, StoreError> {
        let Some(first) = records.first() else {
            return Ok(InsertOutcome::default());
        };
        let expected = match &self.manifest {
            Some(manifest) => manifest.dimensions,
            None => first.embedding.len(),
        };
        if expected == 0 {
            return Err(StoreError::Config("embedding vectors must not be empty".to_string()));
        }
        let vectors: Vec<&[f32]> = records.iter().map(|r| r.embedding.as_slice()).collect();
        self.check_dimensions(expected, &vectors)?;

        if self.manifest.is_none() {
            let manifest = CollectionManifest {
                dimensions: expected,
                model: model_id.to_string(),
                metric: "cosine".to_string(),
                created_epoch_ms: epoch_ms(),
            };
            self.write_manifest(&manifest)?;
            self.manifest = Some(manifest);
        }

        // Plan the change without touching `self`; memory is only updated once
        // the records file has been written.
        let mut outcome = InsertOutcome::default();
        let mut replacements: Vec<(usize, &IndexedRecord)> = Vec::new();
        let mut appended: Vec<IndexedRecord> = Vec::new();
        let mut appended_positions: HashMap<&str, usize> = HashMap::new();
        for record in records {
            let id = record.chunk.id.as_str();
            if upsert {
                if let Some(&idx) = appended_positions.get(id) {
                    appended[idx] = record.clone();
                    outcome.replaced += 1;
                    continue;
                }
                if let Some(&idx) = self.positions.get(id) {
                    replacements.push((idx, record));
                    outcome.replaced += 1;
                    continue;
                }
            }
            appended_positions.insert(id, appended.len());
            appended.push(record.clone());
            outcome.inserted += 1;
        }

        let base = self.records.len();
        if replacements.is_empty() {
            self.append(&appended)?;
            self.records.extend(appended);
        } else {
            let mut next = self.records.clone();
            for (idx, record) in replacements {
                next[idx] = record.clone();
            }
            next.extend(appended);
            self.rewrite(&next)?;
            self.records = next;
        }
        for (idx, record) in self.records.iter().enumerate().skip(base) {
            self.positions.insert(record.chunk.id.clone(), idx);
        }
        Ok(outcome)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(manifest) = &self.manifest {
            self.check_dimensions(manifest.dimensions, &[query])?;
        }

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .filter_map(|(idx, record)| {
                cosine_similarity(query, &record.embedding).map(|score| (idx, score))
            })
            .filter(|(_, score)| score.is_finite())
            .collect();
        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(idx, score)| ScoredChunk {
                chunk: self.records[idx].chunk.clone(),
                score,
            })
            .collect())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        for name in [RECORDS_FILE, MANIFEST_FILE] {
            let path = self.dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(io_error(&path, source)),
            }
        }
        self.records.clear();
        self.positions.clear();
        self.manifest = None;
        Ok(())
    }
}

fn read_records(path: &Path) -> Result<Vec<IndexedRecord>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(io_error(path, source)),
    };
    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| io_error(path, source))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            line: line_no + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

fn write_records(path: &Path, file: File, records: &[IndexedRecord]) -> Result<(), StoreError> {
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record).map_err(|err| io_error(path, err.into()))?;
        writer
            .write_all(b"\n")
            .map_err(|source| io_error(path, source))?;
    }
    writer.flush().map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, SourceKind};
    use pretty_assertions::assert_eq;

    fn record(id: &str, text: &str, embedding: Vec<f32>) -> IndexedRecord {
        IndexedRecord {
            chunk: Chunk {
                id: id.to_string(),
                text: text.to_string(),
                source_document: "doc.pdf".to_string(),
                source_kind: SourceKind::Pdf,
                page: Some(1),
                char_start: 0,
                char_end: text.len(),
                token_estimate: 1,
                checksum: crc32fast::hash(text.as_bytes()),
            },
            embedding,
        }
    }

    fn ids(hits: &[ScoredChunk]) -> Vec<&str> {
        hits.iter().map(|hit| hit.chunk.id.as_str()).collect()
    }

    #[test]
    fn search_orders_by_similarity_and_caps_at_k() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        store
            .insert(
                &[
                    record("a", "a", vec![1.0, 0.0]),
                    record("b", "b", vec![0.0, 1.0]),
                    record("c", "c", vec![0.7, 0.7]),
                ],
                "test-model",
                true,
            )
            .expect("insert");

        let hits = store.search(&[1.0, 0.1], 2).expect("search");
        assert_eq!(ids(&hits), vec!["a", "c"]);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(store.search(&[1.0, 0.0], 10).expect("search").len(), 3);
        assert!(store.search(&[1.0, 0.0], 0).expect("search").is_empty());
    }

    #[test]
    fn empty_store_returns_no_hits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::open(dir.path().join("fresh")).expect("open");
        assert!(store.search(&[1.0, 0.0], 5).expect("search").is_empty());
        assert_eq!(store.model_id().expect("model"), None);
    }

    #[test]
    fn reopened_store_returns_same_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        store
            .insert(
                &[record("a", "a", vec![1.0, 0.0]), record("b", "b", vec![0.0, 1.0])],
                "test-model",
                true,
            )
            .expect("insert");
        let before = store.search(&[0.2, 0.9], 2).expect("search");

        let reopened = LocalVectorStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.search(&[0.2, 0.9], 2).expect("search"), before);
        assert_eq!(reopened.model_id().expect("model").as_deref(), Some("test-model"));
    }

    #[test]
    fn upsert_replaces_while_append_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        let first = store
            .insert(&[record("a", "old", vec![1.0, 0.0])], "m", true)
            .expect("insert");
        assert_eq!(first, InsertOutcome { inserted: 1, replaced: 0 });

        let second = store
            .insert(&[record("a", "new", vec![0.0, 1.0])], "m", true)
            .expect("upsert");
        assert_eq!(second, InsertOutcome { inserted: 0, replaced: 1 });
        assert_eq!(store.len().expect("len"), 1);

        let reopened = LocalVectorStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.records[0].chunk.text, "new");

        let mut store = reopened;
        store
            .insert(&[record("a", "dup", vec![0.0, 1.0])], "m", false)
            .expect("append");
        assert_eq!(store.len().expect("len"), 2);
        assert_eq!(LocalVectorStore::open(dir.path()).expect("reopen").len().expect("len"), 2);
    }

    #[test]
    fn non_finite_scores_are_dropped_from_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        store
            .insert(
                &[
                    record("a", "a", vec![1.0, 0.0]),
                    record("nan", "nan", vec![f32::NAN, 1.0]),
                    record("b", "b", vec![0.6, 0.8]),
                ],
                "m",
                true,
            )
            .expect("insert");
        let hits = store.search(&[1.0, 0.0], 3).expect("search");
        assert_eq!(ids(&hits), vec!["a", "b"]);
    }

    #[test]
    fn failed_rewrite_leaves_memory_matching_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        store
            .insert(&[record("a", "old", vec![1.0, 0.0])], "m", true)
            .expect("insert");
        // A directory where the temp file should go makes the rewrite fail.
        fs::create_dir(dir.path().join(format!("{RECORDS_FILE}.tmp"))).expect("mkdir");

        let result = store.insert(
            &[
                record("a", "new", vec![0.0, 1.0]),
                record("b", "b", vec![0.6, 0.8]),
            ],
            "m",
            true,
        );
        assert!(matches!(result, Err(StoreError::Io { .. })));
        assert_eq!(store.len().expect("len"), 1);
        assert_eq!(store.records[0].chunk.text, "old");
        assert!(!store.positions.contains_key("b"));

        let reopened = LocalVectorStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.records, store.records);
    }

    #[test]
    fn failed_append_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        store
            .insert(&[record("a", "a", vec![1.0, 0.0])], "m", true)
            .expect("insert");
        let records_path = dir.path().join(RECORDS_FILE);
        fs::remove_file(&records_path).expect("remove");
        fs::create_dir(&records_path).expect("mkdir");

        assert!(store
            .insert(&[record("b", "b", vec![0.0, 1.0])], "m", true)
            .is_err());
        assert_eq!(store.len().expect("len"), 1);
        assert!(!store.positions.contains_key("b"));
        assert_eq!(ids(&store.search(&[0.0, 1.0], 5).expect("search")), vec!["a"]);
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        store
            .insert(&[record("a", "a", vec![1.0, 0.0])], "m", true)
            .expect("insert");
        assert!(matches!(
            store.insert(&[record("b", "b", vec![1.0, 0.0, 0.0])], "m", true),
            Err(StoreError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(matches!(
            store.search(&[1.0], 1),
            Err(StoreError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn clear_removes_records_and_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalVectorStore::open(dir.path()).expect("open");
        store
            .insert(&[record("a", "a", vec![1.0, 0.0])], "m", true)
            .expect("insert");
        store.clear().expect("clear");
        assert!(store.is_empty().expect("empty"));
        assert!(store.manifest().is_none());
        assert!(LocalVectorStore::open(dir.path())
            .expect("reopen")
            .is_empty()
            .expect("empty"));
    }
}
