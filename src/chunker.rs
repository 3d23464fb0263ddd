//! Overlapping token-window chunking.

use crate::config::{ChunkingConfig, ConfigError};
use crate::document::{Chunk, SourceDocument};

/// Splits documents into fixed-size token windows with a fixed overlap.
///
/// Tokens are whitespace-delimited words. The normalized document text is the
/// token sequence joined by single spaces, and every chunk is a contiguous slice
/// of it, so dropping the first `chunk_overlap` tokens of every chunk after the
/// first and concatenating reproduces the normalized text.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkingConfig,
}

#[derive(Debug, Clone, Copy)]
struct TokenSpan {
    start: usize,
    end: usize,
    page: Option<u32>,
}

impl Chunker {
    /// Builds a chunker after validating the window settings.
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the underlying config reference.
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Splits one document into chunks in reading order.
    pub fn split(&self, document: &SourceDocument) -> Vec<Chunk> {
        let (body, spans) = tokenize(document);
        if spans.is_empty() {
            return Vec::new();
        }

        let size = self.config.chunk_size;
        let step = size - self.config.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + size).min(spans.len());
            let first = spans[start];
            let last = spans[end - 1];
            let text = body[first.start..last.end].to_string();
            chunks.push(Chunk {
                id: Chunk::make_id(&document.name, chunks.len()),
                checksum: crc32fast::hash(text.as_bytes()),
                text,
                source_document: document.name.clone(),
                source_kind: document.kind,
                page: first.page,
                char_start: first.start,
                char_end: last.end,
                token_estimate: end - start,
            });
            if end == spans.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

fn tokenize(document: &SourceDocument) -> (String, Vec<TokenSpan>) {
    let mut body = String::new();
    let mut spans = Vec::new();
    for page in &document.pages {
        for word in page.text.split_whitespace() {
            if !body.is_empty() {
                body.push(' ');
            }
            let start = body.len();
            body.push_str(word);
            spans.push(TokenSpan {
                start,
                end: body.len(),
                page: page.page,
            });
        }
    }
    (body, spans)
}

/// Collapses every whitespace run to a single space and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PageText, SourceKind};
    use pretty_assertions::assert_eq;

    fn words(count: usize) -> String {
        (0..count)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        })
        .expect("valid config")
    }

    fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
        let mut tokens: Vec<&str> = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let skip = if idx == 0 { 0 } else { overlap };
            tokens.extend(chunk.text.split(' ').skip(skip));
        }
        tokens.join(" ")
    }

    #[test]
    fn overlapping_windows_reassemble_source_text() {
        let text = format!("  {}\n\n\t{}  ", words(37), words(12));
        let doc = SourceDocument::single("doc.pdf", SourceKind::Pdf, text.clone());
        for (size, overlap) in [(1, 0), (5, 0), (5, 2), (8, 7), (10, 3), (100, 20)] {
            let chunks = chunker(size, overlap).split(&doc);
            assert_eq!(
                reassemble(&chunks, overlap),
                normalize_whitespace(&text),
                "size={size} overlap={overlap}"
            );
            assert!(chunks.iter().all(|c| c.token_estimate <= size));
        }
    }

    #[test]
    fn final_window_is_not_contained_in_previous() {
        let doc = SourceDocument::single("doc.pdf", SourceKind::Pdf, words(10));
        let chunks = chunker(6, 2).split(&doc);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "w0 w1 w2 w3 w4 w5");
        assert_eq!(chunks[1].text, "w4 w5 w6 w7 w8 w9");
    }

    #[test]
    fn chunks_record_start_page_and_offsets() {
        let doc = SourceDocument {
            name: "report.pdf".to_string(),
            kind: SourceKind::Pdf,
            pages: vec![
                PageText {
                    page: Some(1),
                    text: "alpha beta gamma".to_string(),
                },
                PageText {
                    page: Some(2),
                    text: "delta epsilon".to_string(),
                },
            ],
        };
        let chunks = chunker(3, 1).split(&doc);
        let pages: Vec<_> = chunks.iter().map(|c| c.page).collect();
        assert_eq!(pages, vec![Some(1), Some(1)]);
        assert_eq!(chunks[1].text, "gamma delta epsilon");
        let body = "alpha beta gamma delta epsilon";
        for chunk in &chunks {
            assert_eq!(&body[chunk.char_start..chunk.char_end], chunk.text);
        }
    }

    #[test]
    fn ids_are_ordinal_and_checksums_follow_text() {
        let doc = SourceDocument::single("a.pdf", SourceKind::Pdf, words(20));
        let chunks = chunker(5, 1).split(&doc);
        assert_eq!(chunks[0].id, "a.pdf#00000");
        assert_eq!(chunks[3].id, "a.pdf#00003");
        assert_eq!(chunks[0].checksum, crc32fast::hash(chunks[0].text.as_bytes()));
    }

    #[test]
    fn blank_document_yields_no_chunks() {
        let doc = SourceDocument::single("empty.pdf", SourceKind::Pdf, " \n\t ");
        assert!(chunker(4, 1).split(&doc).is_empty());
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(Chunker::new(ChunkingConfig {
            chunk_size: 0,
            chunk_overlap: 0
        })
        .is_err());
    }
}
