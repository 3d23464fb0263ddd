//! Web page ingestion: fetch HTML and keep the readable blocks.

use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::SourceError;
use crate::chunker::normalize_whitespace;
use crate::document::{SourceDocument, SourceKind};

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "template", "noscript", "svg", "nav", "header", "footer", "aside",
];

const BLOCK_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "blockquote", "pre",
];

/// Parses `raw` into the normalized form used as the document name.
pub fn normalize_url(raw: &str) -> Result<Url, SourceError> {
    Ok(Url::parse(raw.trim())?)
}

/// Fetches `url` and converts its readable content into a document named
/// after the normalized URL.
pub fn fetch_page(client: &Client, url: &Url) -> Result<SourceDocument, SourceError> {
    let resp = client.get(url.clone()).send()?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    let body = resp.text()?;
    let text = extract_readable_text(&body);
    if text.is_empty() {
        return Err(SourceError::NoText);
    }
    Ok(SourceDocument::single(url.as_str(), SourceKind::Web, text))
}

/// Collects headings, paragraphs, list items, quotes, and preformatted blocks,
/// one block per line.
pub fn extract_readable_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let selectors = RootSelectors::new();
    let root = selectors.pick_root(&document);

    let mut lines = Vec::new();
    for element in root.descendent_elements() {
        let tag = element.value().name();
        if !BLOCK_TAGS.contains(&tag) || has_ancestor_in(&element, SKIPPED_TAGS) {
            continue;
        }
        // Nested blocks are already covered by their outermost block.
        if has_ancestor_in(&element, BLOCK_TAGS) {
            continue;
        }
        let raw: String = element.text().collect();
        let text = normalize_whitespace(&raw);
        if !text.is_empty() {
            lines.push(text);
        }
    }
    lines.join("\n")
}

fn has_ancestor_in(element: &ElementRef<'_>, tags: &[&str]) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|el| tags.contains(&el.name()))
    })
}

struct RootSelectors {
    article: Selector,
    main: Selector,
    body: Selector,
}

impl RootSelectors {
    fn new() -> Self {
        Self {
            article: Selector::parse("article").expect("article selector"),
            main: Selector::parse("main").expect("main selector"),
            body: Selector::parse("body").expect("body selector"),
        }
    }

    fn pick_root<'a>(&self, document: &'a Html) -> ElementRef<'a> {
        document
            .select(&self.article)
            .next()
            .or_else(|| document.select(&self.main).next())
            .or_else(|| document.select(&self.body).next())
            .unwrap_or_else(|| document.root_element())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keeps_article_blocks_and_drops_chrome() {
        let html = r#"
            <html>
              <body>
                <nav><p>Home | About</p></nav>
                <article>
                  <h1>State of Finance for Nature</h1>
                  <p>Finance flows to   <b>nature-based</b> solutions.</p>
                  <ul><li><p>Protect mangroves</p></li><li>Restore peatlands</li></ul>
                  <script>var x = 1;</script>
                </article>
              </body>
            </html>
        "#;
        assert_eq!(
            extract_readable_text(html),
            "State of Finance for Nature\nFinance flows to nature-based solutions.\nProtect mangroves\nRestore peatlands"
        );
    }

    #[test]
    fn trailing_slash_and_bare_host_normalize_alike() {
        let bare = normalize_url("http://example.org").expect("bare");
        let slashed = normalize_url(" http://example.org/ ").expect("slashed");
        assert_eq!(bare.as_str(), "http://example.org/");
        assert_eq!(bare, slashed);
        assert!(matches!(normalize_url("not a url"), Err(SourceError::Url(_))));
    }

    #[test]
    fn falls_back_to_body_without_article() {
        let html = "<html><body><p>Only paragraph.</p><footer><p>Legal</p></footer></body></html>";
        assert_eq!(extract_readable_text(html), "Only paragraph.");
    }
}
