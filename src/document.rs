//! Documents extracted by the loader and the chunk records derived from them.

use serde::{Deserialize, Serialize};

/// Origin of an extracted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// PDF file read from the input directory.
    Pdf,
    /// Web page fetched over HTTP.
    Web,
    /// CSV file rendered as text rows.
    Csv,
}

impl SourceKind {
    /// Stable lowercase name used in storage backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Web => "web",
            Self::Csv => "csv",
        }
    }

    /// Parses a name produced by [`SourceKind::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pdf" => Some(Self::Pdf),
            "web" => Some(Self::Web),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// Text of a single page (or the whole body for page-less sources).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number when the source has pages.
    pub page: Option<u32>,
    /// Raw extracted text.
    pub text: String,
}

/// Raw document text awaiting chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// File name or URL identifying the document in citations.
    pub name: String,
    /// Where the document came from.
    pub kind: SourceKind,
    /// Extracted pages in reading order.
    pub pages: Vec<PageText>,
}

impl SourceDocument {
    /// Builds a document that has no page structure.
    pub fn single(name: impl Into<String>, kind: SourceKind, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            pages: vec![PageText {
                page: None,
                text: text.into(),
            }],
        }
    }

    /// True when no page contains any non-whitespace text.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|page| page.text.trim().is_empty())
    }
}

/// Bounded span of document text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{source_document}#{ordinal}"`, unique within a loader run.
    pub id: String,
    /// Whitespace-normalized chunk body.
    pub text: String,
    /// File name or URL of the originating document.
    pub source_document: String,
    /// Originating source type.
    pub source_kind: SourceKind,
    /// 1-based page where the chunk starts, when the source has pages.
    pub page: Option<u32>,
    /// Byte offset of the chunk within the normalized document text.
    pub char_start: usize,
    /// Exclusive end offset within the normalized document text.
    pub char_end: usize,
    /// Whitespace token count.
    pub token_estimate: usize,
    /// CRC32 of `text`.
    pub checksum: u32,
}

impl Chunk {
    /// Formats the identifier for the `ordinal`-th chunk of `source`.
    pub fn make_id(source: &str, ordinal: usize) -> String {
        format!("{source}#{ordinal:05}")
    }

    /// Human-readable location used in prompts and citations.
    pub fn location(&self) -> String {
        match self.page {
            Some(page) => format!("{} (page {})", self.source_document, page),
            None => self.source_document.clone(),
        }
    }
}
