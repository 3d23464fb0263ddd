//! CSV ingestion: every data row becomes one comma-joined text line.

use std::path::Path;

use super::SourceError;
use crate::document::{SourceDocument, SourceKind};

/// Reads a CSV file (header row excluded) into a single page-less document.
pub fn read_csv(path: &Path, name: &str) -> Result<SourceDocument, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut text = String::new();
    for record in reader.records() {
        let record = record?;
        let line = record
            .iter()
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(", ");
        if line.trim_matches([',', ' ']).is_empty() {
            continue;
        }
        text.push_str(&line);
        text.push('\n');
    }

    if text.is_empty() {
        return Err(SourceError::NoText);
    }
    Ok(SourceDocument::single(name, SourceKind::Csv, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn renders_rows_without_header() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "company,score\nAcme, 71\n,\nGlobex,44").expect("write csv");
        let doc = read_csv(file.path(), "scores.csv").expect("read csv");
        assert_eq!(doc.name, "scores.csv");
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].text, "Acme, 71\nGlobex, 44\n");
    }

    #[test]
    fn header_only_file_has_no_text() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "company,score").expect("write csv");
        assert!(matches!(
            read_csv(file.path(), "empty.csv"),
            Err(SourceError::NoText)
        ));
    }
}
