//! Document loading stage: sources in, chunk snapshot out.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::{info, warn};

use crate::chunker::Chunker;
use crate::config::{ChunkingConfig, ConfigError};
use crate::document::{Chunk, SourceDocument, SourceKind};

pub mod pdf;
pub mod table;
pub mod web;

/// Fatal loader failures.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The PDF input directory could not be listed.
    #[error("cannot read input directory {path:?}: {source}")]
    InputDir {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The configured input path exists but is not a directory.
    #[error("input path {0:?} is not a directory")]
    NotADirectory(PathBuf),
    /// The HTTP client for web sources could not be built.
    #[error("failed to build HTTP client for web sources: {0}")]
    HttpClient(#[source] reqwest::Error),
    /// The snapshot file could not be written.
    #[error("failed to write chunk snapshot {path:?}: {source}")]
    SnapshotWrite {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The snapshot file could not be read.
    #[error("failed to read chunk snapshot {path:?}: {source}")]
    SnapshotRead {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A snapshot line did not decode into a chunk.
    #[error("invalid chunk record in {path:?} at line {line}: {source}")]
    SnapshotRecord {
        /// Snapshot path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Invalid chunking settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Recoverable failure for a single source; the source is skipped.
#[derive(Debug, Error)]
pub enum SourceError {
    /// File could not be read.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// PDF could not be parsed.
    #[error("unparseable PDF: {0}")]
    Pdf(#[from] lopdf::Error),
    /// Encrypted PDFs are not decrypted.
    #[error("PDF is encrypted")]
    Encrypted,
    /// CSV could not be parsed.
    #[error("unparseable CSV: {0}")]
    Csv(#[from] csv::Error),
    /// URL did not parse.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    /// HTTP transport failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success HTTP status.
    #[error("server returned status {0}")]
    Status(u16),
    /// Source parsed but contained no extractable text.
    #[error("no extractable text")]
    NoText,
}

/// Everything the loader ingests in one run.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    /// Directory scanned (non-recursively) for `*.pdf` files.
    pub pdf_dir: PathBuf,
    /// Web pages to fetch.
    pub urls: Vec<String>,
    /// CSV files to render as text.
    pub csv_paths: Vec<PathBuf>,
}

/// Source that was left out of the snapshot, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    /// File name, path, or URL.
    pub source: String,
    /// Display form of the failure.
    pub reason: String,
}

/// Outcome of a loader run.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Chunks in source order.
    pub chunks: Vec<Chunk>,
    /// Number of documents that produced text.
    pub documents: usize,
    /// Sources excluded from the output.
    pub skipped: Vec<SkippedSource>,
}

/// Reads PDFs, web pages, and CSVs and splits them into chunks.
pub struct DocumentLoader {
    chunker: Chunker,
    http: Option<Client>,
}

impl DocumentLoader {
    /// Builds a loader with validated chunk settings.
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            chunker: Chunker::new(config)?,
            http: None,
        })
    }

    /// Uses the provided client for web sources instead of building one lazily.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Loads every source and chunks the resulting documents.
    pub fn load(&self, sources: &SourceSet) -> Result<LoadReport, LoadError> {
        let (documents, skipped) = self.collect_documents(sources)?;
        let mut chunks = Vec::new();
        for doc in &documents {
            let before = chunks.len();
            chunks.extend(self.chunker.split(doc));
            info!(
                source = %doc.name,
                chunks = chunks.len() - before,
                "chunked document"
            );
        }
        info!(
            documents = documents.len(),
            chunks = chunks.len(),
            skipped = skipped.len(),
            "load complete"
        );
        Ok(LoadReport {
            chunks,
            documents: documents.len(),
            skipped,
        })
    }

    /// Extracts documents from all sources, skipping (and logging) unreadable ones.
    pub fn collect_documents(
        &self,
        sources: &SourceSet,
    ) -> Result<(Vec<SourceDocument>, Vec<SkippedSource>), LoadError> {
        let mut documents = Vec::new();
        let mut skipped = Vec::new();
        let mut seen = HashSet::new();

        for path in list_pdfs(&sources.pdf_dir)? {
            let name = file_label(&path);
            if !seen.insert(name.clone()) {
                skip(&mut skipped, name, "duplicate source name");
                continue;
            }
            match pdf::extract_pages(&path) {
                Ok(pages) => documents.push(SourceDocument {
                    name,
                    kind: SourceKind::Pdf,
                    pages,
                }),
                Err(err) => skip(&mut skipped, name, err),
            }
        }
        info!(pdfs = documents.len(), dir = %sources.pdf_dir.display(), "loaded PDF documents");

        if !sources.urls.is_empty() {
            let client = match &self.http {
                Some(client) => client.clone(),
                None => default_http_client()?,
            };
            for raw in &sources.urls {
                let url = match web::normalize_url(raw) {
                    Ok(url) => url,
                    Err(err) => {
                        skip(&mut skipped, raw.clone(), err);
                        continue;
                    }
                };
                let name = url.as_str().to_string();
                if !seen.insert(name.clone()) {
                    skip(&mut skipped, name, "duplicate source name");
                    continue;
                }
                match web::fetch_page(&client, &url) {
                    Ok(doc) => documents.push(doc),
                    Err(err) => skip(&mut skipped, name, err),
                }
            }
        }

        for path in &sources.csv_paths {
            let name = file_label(path);
            if !seen.insert(name.clone()) {
                skip(&mut skipped, name, "duplicate source name");
                continue;
            }
            match table::read_csv(path, &name) {
                Ok(doc) => documents.push(doc),
                Err(err) => skip(&mut skipped, name, err),
            }
        }

        Ok((documents, skipped))
    }
}

fn skip(skipped: &mut Vec<SkippedSource>, source: String, reason: impl ToString) {
    let reason = reason.to_string();
    warn!(source = %source, reason = %reason, "skipping source");
    skipped.push(SkippedSource { source, reason });
}

fn default_http_client() -> Result<Client, LoadError> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("docqa/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(LoadError::HttpClient)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Lists `*.pdf` files directly inside `dir`, sorted by path.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let meta = fs::metadata(dir).map_err(|source| LoadError::InputDir {
        path: dir.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(LoadError::NotADirectory(dir.to_path_buf()));
    }
    let entries = fs::read_dir(dir).map_err(|source| LoadError::InputDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut pdfs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LoadError::InputDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            pdfs.push(path);
        }
    }
    pdfs.sort();
    Ok(pdfs)
}

/// Overwrites `path` with one JSON chunk per line.
pub fn write_snapshot(path: &Path, chunks: &[Chunk]) -> Result<(), LoadError> {
    let wrap = |source: io::Error| LoadError::SnapshotWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    let file = File::create(path).map_err(wrap)?;
    let mut writer = BufWriter::new(file);
    for chunk in chunks {
        serde_json::to_writer(&mut writer, chunk).map_err(|err| wrap(err.into()))?;
        writer.write_all(b"\n").map_err(wrap)?;
    }
    writer.flush().map_err(wrap)?;
    Ok(())
}

/// Reads a snapshot written by [`write_snapshot`]; blank lines are ignored.
pub fn read_snapshot(path: &Path) -> Result<Vec<Chunk>, LoadError> {
    let wrap = |source: io::Error| LoadError::SnapshotRead {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(wrap)?);
    let mut chunks = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(wrap)?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk = serde_json::from_str(&line).map_err(|source| LoadError::SnapshotRecord {
            path: path.to_path_buf(),
            line: line_no + 1,
            source,
        })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Per-source chunk counts, largest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkStats {
    counts: Vec<(String, usize)>,
}

impl ChunkStats {
    /// Tallies chunks by source document.
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
        for chunk in chunks {
            *tally.entry(chunk.source_document.as_str()).or_default() += 1;
        }
        let mut counts: Vec<(String, usize)> = tally
            .into_iter()
            .map(|(source, count)| (source.to_string(), count))
            .collect();
        // Stable sort keeps name order among equal counts.
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        Self { counts }
    }

    /// The `n` sources with the most chunks.
    pub fn top(&self, n: usize) -> &[(String, usize)] {
        &self.counts[..n.min(self.counts.len())]
    }

    /// Total chunk count.
    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, count)| count).sum()
    }

    /// Text bar chart of the top `n` sources, bars scaled to `width` columns.
    pub fn render(&self, n: usize, width: usize) -> String {
        let top = self.top(n);
        let max = top.first().map(|(_, count)| *count).unwrap_or(0).max(1);
        let mut out = String::new();
        for (source, count) in top {
            let bar = (count * width).div_ceil(max);
            out.push_str(&format!("{count:>6} {:<width$} {source}\n", "#".repeat(bar)));
        }
        out
    }
}
