//! Retrieval-augmented question answering over an indexed collection.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, EmptyContextPolicy, GenerationConfig, RetrievalConfig};
use crate::embedder::{EmbedError, Embedder};
use crate::embeddings::{QueryResult, ScoredChunk};
use crate::providers::{GenerationError, LlmProvider, ProviderRequest};
use crate::vector_store::{StoreError, VectorStore};

/// Answer returned when nothing was retrieved and the policy is to refuse.
pub const NO_CONTEXT_ANSWER: &str = "No relevant documents were found for this question.";

/// System instruction sent with every completion request.
pub const SYSTEM_INSTRUCTION: &str = "You are a careful research assistant answering questions about a \
collection of documents. Use only the numbered context passages supplied with the question. \
Cite every claim with the passage number in square brackets, e.g. [1] or [2][3]. If the context \
does not contain the answer, say so plainly instead of guessing.";

const NO_CONTEXT_NOTE: &str = "(no context found: the document collection returned no passages for this question)";

/// Failures while answering a question.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Question was blank.
    #[error("question must not be empty")]
    EmptyQuestion,
    /// Query embedding failed at the service level.
    #[error("failed to embed question: {0}")]
    Embed(#[source] EmbedError),
    /// Vector search failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The language model call failed; no partial answer is produced.
    #[error("answer generation failed: {0}")]
    Generation(#[from] GenerationError),
}

/// Document location cited by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Citation {
    /// File name or URL.
    pub source_document: String,
    /// 1-based page, when known.
    pub page: Option<u32>,
}

/// Generated answer plus the passages it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Model output, or the fixed refusal text.
    pub text: String,
    /// Sources of the passages included in the context, rank order, de-duplicated.
    pub citations: Vec<Citation>,
    /// Passages that made it into the context.
    pub context_chunks: Vec<ScoredChunk>,
    /// False when the answer was produced without any retrieved context.
    pub grounded: bool,
}

/// Context block rendered from the best hits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBlock {
    /// Numbered passages, best first.
    pub text: String,
    /// Hits that were rendered (a prefix of the input).
    pub included: Vec<ScoredChunk>,
}

/// Everything needed to call the model, built before the call happens.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    /// Original question.
    pub question: String,
    /// Raw retrieval result.
    pub hits: QueryResult,
    /// Bounded context block.
    pub context: ContextBlock,
    /// User prompt sent alongside [`SYSTEM_INSTRUCTION`].
    pub prompt: String,
}

/// Renders `[n] Source: ... | Score: ...` passages while they fit in `max_chars`
/// characters.
///
/// The first passage that does not fit and everything ranked below it are
/// dropped. A top passage that alone exceeds the bound is truncated so the
/// block is never empty when hits exist.
pub fn build_context(hits: &[ScoredChunk], max_chars: usize) -> ContextBlock {
    let mut block = ContextBlock::default();
    let mut used = 0usize;
    for (idx, hit) in hits.iter().enumerate() {
        let entry = format!(
            "[{}] Source: {} | Score: {:.4}\n{}\n\n",
            idx + 1,
            hit.chunk.location(),
            hit.score,
            hit.chunk.text.trim()
        );
        let entry_chars = entry.chars().count();
        if used + entry_chars <= max_chars {
            block.text.push_str(&entry);
            block.included.push(hit.clone());
            used += entry_chars;
            continue;
        }
        if idx == 0 && max_chars > 0 {
            block.text.push_str(truncate_chars(&entry, max_chars));
            block.included.push(hit.clone());
        }
        debug!(kept = block.included.len(), dropped = hits.len() - block.included.len(), "context bound reached");
        break;
    }
    block
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Builds the user prompt: context, question, numbered instructions.
pub fn build_prompt(question: &str, context: &str, max_words: Option<usize>) -> String {
    let mut prompt = String::new();
    prompt.push_str("Context:\n");
    if context.trim().is_empty() {
        prompt.push_str(NO_CONTEXT_NOTE);
        prompt.push('\n');
    } else {
        prompt.push_str(context.trim_end());
        prompt.push('\n');
    }
    prompt.push_str("\nQuestion:\n");
    prompt.push_str(question.trim());
    prompt.push_str(
        "\n\nInstructions:\n1. Answer directly in a few sentences using only the context.\n\
         2. Cite supporting passages as [n] after each claim.\n\
         3. If the context is insufficient, say what is missing.\n",
    );
    if let Some(limit) = max_words {
        prompt.push_str(&format!("4. Limit the answer to roughly {limit} words.\n"));
    }
    prompt
}

/// De-duplicated `(document, page)` pairs in rank order.
pub fn citations_for(chunks: &[ScoredChunk]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for hit in chunks {
        let citation = Citation {
            source_document: hit.chunk.source_document.clone(),
            page: hit.chunk.page,
        };
        if !citations.contains(&citation) {
            citations.push(citation);
        }
    }
    citations
}

/// Question answerer owning its embedder, store, and model provider.
pub struct QueryAnswerer {
    embedder: Box<dyn Embedder>,
    store: Box<dyn VectorStore>,
    provider: Box<dyn LlmProvider>,
    retrieval: RetrievalConfig,
    generation: GenerationConfig,
}

impl QueryAnswerer {
    /// Wires the collaborators together after validating both configs.
    pub fn new(
        embedder: Box<dyn Embedder>,
        store: Box<dyn VectorStore>,
        provider: Box<dyn LlmProvider>,
        retrieval: RetrievalConfig,
        generation: GenerationConfig,
    ) -> Result<Self, ConfigError> {
        retrieval.validate()?;
        generation.validate()?;
        Ok(Self {
            embedder,
            store,
            provider,
            retrieval,
            generation,
        })
    }

    /// Retrieval settings in effect.
    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Returns the `k` stored chunks most similar to `question`.
    ///
    /// A question the embedder cannot represent (no tokens) yields an empty
    /// result rather than an error.
    pub fn retrieve(&self, question: &str, k: usize) -> Result<QueryResult, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::EmptyQuestion);
        }
        if self.store.is_empty()? {
            debug!("vector store is empty");
            return Ok(QueryResult::default());
        }
        if let Some(stored) = self.store.model_id()? {
            if stored != self.embedder.model_id() {
                warn!(
                    stored = %stored,
                    embedder = %self.embedder.model_id(),
                    "query embedder differs from the model used at index time"
                );
            }
        }
        let vector = match self.embedder.embed(question) {
            Ok(vector) => vector,
            Err(err) if matches!(err, EmbedError::EmptyInput) => {
                debug!("question has no embeddable content");
                return Ok(QueryResult::default());
            }
            Err(err) => return Err(QueryError::Embed(err)),
        };
        let hits = self.store.search(&vector, k)?;
        Ok(QueryResult { hits })
    }

    /// Retrieves, bounds the context, and renders the prompt without calling the model.
    pub fn prepare(&self, question: &str) -> Result<PreparedQuery, QueryError> {
        let hits = self.retrieve(question, self.retrieval.top_k)?;
        let context = build_context(&hits.hits, self.retrieval.max_context_chars);
        let prompt = build_prompt(question, &context.text, self.generation.max_words);
        Ok(PreparedQuery {
            question: question.to_string(),
            hits,
            context,
            prompt,
        })
    }

    /// Answers `question` with citations to the passages that grounded it.
    pub fn answer(&self, question: &str) -> Result<Answer, QueryError> {
        let prepared = self.prepare(question)?;
        self.complete(prepared)
    }

    /// Calls the model for an already prepared query.
    pub fn complete(&self, prepared: PreparedQuery) -> Result<Answer, QueryError> {
        let grounded = !prepared.context.included.is_empty();
        if !grounded && self.retrieval.empty_context == EmptyContextPolicy::Refuse {
            info!("no relevant context retrieved; refusing to answer");
            return Ok(Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
                context_chunks: Vec::new(),
                grounded: false,
            });
        }

        let request = ProviderRequest {
            instruction: SYSTEM_INSTRUCTION,
            prompt: &prepared.prompt,
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_completion_tokens,
        };
        info!(
            provider = self.provider.name(),
            passages = prepared.context.included.len(),
            "requesting answer"
        );
        let text = self.provider.answer(&request)?;
        Ok(Answer {
            text: text.trim().to_string(),
            citations: citations_for(&prepared.context.included),
            context_chunks: prepared.context.included,
            grounded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, SourceKind};
    use crate::embedder::HashingEmbedder;
    use crate::embeddings::IndexedRecord;
    use crate::vector_store::LocalVectorStore;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn chunk(source: &str, page: Option<u32>, ordinal: usize, text: &str) -> Chunk {
        Chunk {
            id: Chunk::make_id(source, ordinal),
            text: text.to_string(),
            source_document: source.to_string(),
            source_kind: SourceKind::Pdf,
            page,
            char_start: 0,
            char_end: text.len(),
            token_estimate: text.split_whitespace().count(),
            checksum: crc32fast::hash(text.as_bytes()),
        }
    }

    fn hit(source: &str, page: Option<u32>, ordinal: usize, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: chunk(source, page, ordinal, text),
            score,
        }
    }

    struct Recording {
        prompts: Rc<RefCell<Vec<String>>>,
        reply: &'static str,
    }

    impl LlmProvider for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, GenerationError> {
            self.prompts.borrow_mut().push(request.prompt.to_string());
            Ok(self.reply.to_string())
        }
    }

    struct Unavailable;

    impl LlmProvider for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn answer(&self, _request: &ProviderRequest<'_>) -> Result<String, GenerationError> {
            Err(GenerationError::Status {
                provider: "unavailable",
                status: 503,
                body: "overloaded".to_string(),
            })
        }
    }

    fn indexed_store(dir: &std::path::Path, chunks: &[Chunk]) -> LocalVectorStore {
        let embedder = HashingEmbedder::default();
        let mut store = LocalVectorStore::open(dir).expect("open");
        let records: Vec<IndexedRecord> = chunks
            .iter()
            .map(|chunk| IndexedRecord {
                chunk: chunk.clone(),
                embedding: embedder.embed(&chunk.text).expect("embed"),
            })
            .collect();
        store
            .insert(&records, embedder.model_id(), true)
            .expect("insert");
        store
    }

    fn answerer(
        store: LocalVectorStore,
        provider: Box<dyn LlmProvider>,
        retrieval: RetrievalConfig,
    ) -> QueryAnswerer {
        QueryAnswerer::new(
            Box::new(HashingEmbedder::default()),
            Box::new(store),
            provider,
            retrieval,
            GenerationConfig::default(),
        )
        .expect("answerer")
    }

    #[test]
    fn context_drops_lowest_ranked_entries_first() {
        let hits = vec![
            hit("a.pdf", Some(1), 0, "alpha passage", 0.9),
            hit("b.pdf", Some(2), 0, "beta passage", 0.8),
            hit("c.pdf", None, 0, "gamma passage", 0.7),
        ];
        let full = build_context(&hits, 10_000);
        assert_eq!(full.included.len(), 3);
        assert!(full.text.starts_with("[1] Source: a.pdf (page 1) | Score: 0.9000\nalpha passage"));
        assert!(full.text.contains("[3] Source: c.pdf | Score: 0.7000"));

        let first_two = build_context(&hits[..2], 10_000).text.chars().count();
        let bounded = build_context(&hits, first_two);
        assert_eq!(bounded.included.len(), 2);
        assert_eq!(bounded.included[1].chunk.source_document, "b.pdf");
        assert!(bounded.text.chars().count() <= first_two);
    }

    #[test]
    fn oversized_top_entry_is_truncated_to_the_char_bound() {
        let hits = vec![hit("a.pdf", None, 0, "été été été été été été", 0.5)];
        let block = build_context(&hits, 40);
        assert_eq!(block.included.len(), 1);
        assert_eq!(block.text.chars().count(), 40);
        assert!(block.text.len() > 40);
        assert!(block.text.ends_with("été ét"));
        assert!(build_context(&[], 40).text.is_empty());
    }

    #[test]
    fn citations_are_deduplicated_in_rank_order() {
        let hits = vec![
            hit("b.pdf", Some(3), 0, "x", 0.9),
            hit("a.pdf", Some(1), 0, "y", 0.8),
            hit("b.pdf", Some(3), 1, "z", 0.7),
        ];
        let citations = citations_for(&hits);
        assert_eq!(
            citations,
            vec![
                Citation {
                    source_document: "b.pdf".to_string(),
                    page: Some(3)
                },
                Citation {
                    source_document: "a.pdf".to_string(),
                    page: Some(1)
                },
            ]
        );
    }

    #[test]
    fn prompt_includes_word_limit_only_when_requested() {
        let with_limit = build_prompt("Why?", "[1] Source: a.pdf\ntext", Some(80));
        assert!(with_limit.contains("roughly 80 words"));
        let without = build_prompt("Why?", "", None);
        assert!(without.contains(NO_CONTEXT_NOTE));
        assert!(!without.contains("words."));
    }

    #[test]
    fn answers_with_citations_from_the_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = indexed_store(
            dir.path(),
            &[
                chunk("mangroves.pdf", Some(2), 0, "Mangroves store large amounts of carbon in coastal soils."),
                chunk("reefs.pdf", Some(1), 0, "Coral reefs host a quarter of marine species."),
            ],
        );
        let prompts = Rc::new(RefCell::new(Vec::new()));
        let provider = Recording {
            prompts: Rc::clone(&prompts),
            reply: " Mangroves store carbon in their soils [1]. ",
        };
        let retrieval = RetrievalConfig {
            top_k: 1,
            ..RetrievalConfig::default()
        };
        let answerer = answerer(store, Box::new(provider), retrieval);

        let answer = answerer
            .answer("How much carbon do mangroves store?")
            .expect("answer");
        assert!(answer.grounded);
        assert_eq!(answer.text, "Mangroves store carbon in their soils [1].");
        assert_eq!(answer.citations[0].source_document, "mangroves.pdf");
        assert_eq!(answer.citations[0].page, Some(2));
        assert_eq!(prompts.borrow().len(), 1);
        assert!(prompts.borrow()[0].contains("[1] Source: mangroves.pdf (page 2)"));
    }

    #[test]
    fn empty_store_refuses_without_calling_the_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::open(dir.path()).expect("open");
        let prompts = Rc::new(RefCell::new(Vec::new()));
        let provider = Recording {
            prompts: Rc::clone(&prompts),
            reply: "unused",
        };
        let answerer = answerer(store, Box::new(provider), RetrievalConfig::default());

        let result = answerer.retrieve("anything at all", 5).expect("retrieve");
        assert!(result.is_empty());
        let answer = answerer.answer("anything at all").expect("answer");
        assert_eq!(answer.text, NO_CONTEXT_ANSWER);
        assert!(!answer.grounded);
        assert!(answer.citations.is_empty());
        assert!(prompts.borrow().is_empty());
    }

    #[test]
    fn ask_model_policy_sends_no_context_note() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::open(dir.path()).expect("open");
        let prompts = Rc::new(RefCell::new(Vec::new()));
        let provider = Recording {
            prompts: Rc::clone(&prompts),
            reply: "I could not find this in the documents.",
        };
        let retrieval = RetrievalConfig {
            empty_context: EmptyContextPolicy::AskModel,
            ..RetrievalConfig::default()
        };
        let answerer = answerer(store, Box::new(provider), retrieval);

        let answer = answerer.answer("What is the capital of Mars?").expect("answer");
        assert!(!answer.grounded);
        assert!(answer.citations.is_empty());
        assert!(prompts.borrow()[0].contains(NO_CONTEXT_NOTE));
    }

    #[test]
    fn provider_failure_is_a_generation_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = indexed_store(
            dir.path(),
            &[chunk("a.pdf", Some(1), 0, "Seagrass meadows capture carbon.")],
        );
        let answerer = answerer(store, Box::new(Unavailable), RetrievalConfig::default());

        let err = answerer.answer("Do seagrass meadows capture carbon?").expect_err("fails");
        assert!(matches!(
            err,
            QueryError::Generation(GenerationError::Status { status: 503, .. })
        ));
    }

    #[test]
    fn blank_question_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalVectorStore::open(dir.path()).expect("open");
        let answerer = answerer(store, Box::new(Unavailable), RetrievalConfig::default());
        assert!(matches!(answerer.answer("   "), Err(QueryError::EmptyQuestion)));
    }
}
