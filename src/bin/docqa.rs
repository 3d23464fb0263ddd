use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use docqa::cli::{Cli, Command, CredentialArgs, EmbedderArgs, GenerationArgs, StoreArgs};
use docqa::config::PipelineConfig;
use docqa::loader::{write_snapshot, ChunkStats, DocumentLoader, SourceSet};
use docqa::providers::{GenerationError, LlmProvider, ProviderRequest};
use docqa::{index_snapshot, Answer, IndexReport, PreparedQuery, QueryAnswerer};
use tracing::info;
use tracing_subscriber::EnvFilter;

const STATS_TOP_SOURCES: usize = 15;
const STATS_BAR_WIDTH: usize = 40;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docqa=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.build_config().context("invalid configuration")?;
    match &cli.command {
        Command::Load(args) => {
            load(&config, &args.sources.source_set())?;
        }
        Command::Index(args) => {
            index(
                &config,
                &args.embedder,
                &args.store,
                &args.credentials,
                args.write.reset,
            )?;
        }
        Command::Query(args) => {
            query(
                &config,
                &args.question,
                &args.embedder,
                &args.store,
                &args.generation,
                &args.credentials,
            )?;
        }
        Command::Run(args) => {
            load(&config, &args.sources.source_set())?;
            index(
                &config,
                &args.embedder,
                &args.store,
                &args.credentials,
                args.write.reset,
            )?;
            if let Some(question) = &args.question {
                query(
                    &config,
                    question,
                    &args.embedder,
                    &args.store,
                    &args.generation,
                    &args.credentials,
                )?;
            }
        }
    }
    Ok(())
}

fn load(config: &PipelineConfig, sources: &SourceSet) -> Result<()> {
    let loader = DocumentLoader::new(config.chunking)?;
    let report = loader
        .load(sources)
        .with_context(|| format!("failed to load documents from {:?}", sources.pdf_dir))?;
    write_snapshot(&config.snapshot_path, &report.chunks)
        .with_context(|| format!("failed to write snapshot {:?}", config.snapshot_path))?;

    println!(
        "loaded {} chunk(s) from {} document(s) into {}",
        report.chunks.len(),
        report.documents,
        config.snapshot_path.display()
    );
    for skipped in &report.skipped {
        println!("skipped {}: {}", skipped.source, skipped.reason);
    }
    let stats = ChunkStats::from_chunks(&report.chunks);
    if stats.total() > 0 {
        println!("\n--- Chunks per source (top {STATS_TOP_SOURCES}) ---");
        print!("{}", stats.render(STATS_TOP_SOURCES, STATS_BAR_WIDTH));
    }
    Ok(())
}

fn index(
    config: &PipelineConfig,
    embedder: &EmbedderArgs,
    store: &StoreArgs,
    credentials: &CredentialArgs,
    reset: bool,
) -> Result<IndexReport> {
    let embedder = embedder.build(credentials)?;
    let mut store = store.open().context("failed to open vector store")?;
    if reset {
        store.clear().context("failed to reset vector store")?;
        info!("vector store cleared");
    }
    let report = index_snapshot(
        &config.snapshot_path,
        embedder.as_ref(),
        store.as_mut(),
        config.upsert,
    )
    .with_context(|| format!("failed to index {:?}", config.snapshot_path))?;
    println!(
        "indexed {} chunk(s) ({} replaced, {} skipped); collection now holds {}",
        report.embedded,
        report.replaced,
        report.skipped,
        store.len()?
    );
    Ok(report)
}

fn query(
    config: &PipelineConfig,
    question: &str,
    embedder: &EmbedderArgs,
    store: &StoreArgs,
    generation: &GenerationArgs,
    credentials: &CredentialArgs,
) -> Result<()> {
    let embedder = embedder.build(credentials)?;
    let provider = if generation.dry_run {
        None
    } else {
        Some(generation.build_provider(credentials)?)
    };
    let store = store.open().context("failed to open vector store")?;

    match provider {
        None => {
            let answerer = QueryAnswerer::new(
                embedder,
                store,
                Box::new(DryRun),
                config.retrieval,
                config.generation,
            )?;
            let prepared = answerer.prepare(question)?;
            print_prepared(&prepared);
            println!("dry-run enabled; skipping LLM call.");
        }
        Some(provider) => {
            let answerer = QueryAnswerer::new(
                embedder,
                store,
                provider,
                config.retrieval,
                config.generation,
            )?;
            let answer = answerer
                .answer(question)
                .context("failed to answer question")?;
            print_answer(&answer);
        }
    }
    Ok(())
}

fn print_prepared(prepared: &PreparedQuery) {
    println!(
        "--- Retrieved Context ({} of {} hit(s)) ---\n{}",
        prepared.context.included.len(),
        prepared.hits.len(),
        prepared.context.text
    );
    println!("--- Prompt ---\n{}", prepared.prompt);
}

fn print_answer(answer: &Answer) {
    println!("--- Answer ---\n{}", answer.text);
    if !answer.grounded {
        return;
    }
    println!("\n--- Sources ---");
    for citation in &answer.citations {
        match citation.page {
            Some(page) => println!("- {} (page {})", citation.source_document, page),
            None => println!("- {}", citation.source_document),
        }
    }
}

/// Placeholder provider for `--dry-run`; the prepared query is never completed.
struct DryRun;

impl LlmProvider for DryRun {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn answer(&self, _request: &ProviderRequest<'_>) -> Result<String, GenerationError> {
        Err(GenerationError::Config(
            "dry run does not call a model".to_string(),
        ))
    }
}
