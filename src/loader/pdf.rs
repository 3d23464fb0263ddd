//! Per-page PDF text extraction backed by `lopdf`.

use std::path::Path;

use lopdf::Document;
use tracing::debug;

use super::SourceError;
use crate::document::PageText;

/// Extracts the text of every page, in page order.
///
/// Pages whose content streams cannot be decoded are dropped individually; a
/// file with no extractable text at all (scanned or image-only) is an error.
pub fn extract_pages(path: &Path) -> Result<Vec<PageText>, SourceError> {
    let doc = Document::load(path)?;
    if doc.is_encrypted() {
        return Err(SourceError::Encrypted);
    }

    let mut pages = Vec::new();
    for page_num in doc.get_pages().into_keys() {
        match doc.extract_text(&[page_num]) {
            Ok(text) if !text.trim().is_empty() => pages.push(PageText {
                page: Some(page_num),
                text,
            }),
            Ok(_) => debug!(path = %path.display(), page = page_num, "page has no text"),
            Err(err) => debug!(
                path = %path.display(),
                page = page_num,
                error = %err,
                "failed to extract page text"
            ),
        }
    }

    if pages.is_empty() {
        return Err(SourceError::NoText);
    }
    Ok(pages)
}
