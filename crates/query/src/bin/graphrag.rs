use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use extract::{BatchExtractionCoordinator, EntityExtractor, OllamaClient};
use index::{EmbeddingCache, EmbeddingProvider, Neo4jGraphStore, OllamaEmbeddingClient, QdrantVectorIndex};
use ingest::Chunk;
use query::{
    AppConfig, EmbeddingCosine, HttpCrossEncoder, Reranker, RetrievalOrchestrator, ScoringStrategy,
    TransformerSimilarity,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphrag")]
#[command(about = "Graph-augmented retrieval and LLM entity extraction")]
struct Cli {
    /// Config file (without extension is fine); defaults to ./graphrag.toml if present
    #[arg(long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve ranked context for a query and print it as JSON
    Retrieve {
        query: String,

        /// Vector candidates to fetch
        #[arg(long)]
        top_k: Option<usize>,

        /// Chunks to keep after reranking
        #[arg(long)]
        top_k_rerank: Option<usize>,
    },
    /// Extract entities and relationships from a text file, one chunk per paragraph
    Extract {
        file: PathBuf,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        concurrency: Option<usize>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Paragraphs of `text` as chunks, with byte offsets into the file.
fn paragraph_chunks(doc_id: &str, text: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut start = None;
    let mut end = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                chunks.push(Chunk::new(doc_id.to_string(), text[s..end].trim().to_string(), (s, end)));
            }
        } else {
            start.get_or_insert(offset);
            end = offset + line.len();
        }
        offset += line.len();
    }
    if let Some(s) = start {
        chunks.push(Chunk::new(doc_id.to_string(), text[s..end].trim().to_string(), (s, end)));
    }
    chunks
}

async fn build_orchestrator(config: &AppConfig) -> Result<RetrievalOrchestrator> {
    let services = &config.services;

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbeddingClient::new(
        services.ollama_url.clone(),
        services.embedding_model.clone(),
    ));
    let cache = Arc::new(EmbeddingCache::new(embedder, config.cache.clone()));

    let vectors = Arc::new(QdrantVectorIndex::new(
        services.qdrant_url.clone(),
        services.qdrant_collection.clone(),
    ));
    let graph = Arc::new(
        Neo4jGraphStore::connect(
            &services.neo4j_uri,
            &services.neo4j_user,
            &services.neo4j_password,
            config.retrieval.graph.clone(),
        )
        .await?,
    );

    let mut strategies: Vec<Arc<dyn ScoringStrategy>> = Vec::new();
    if let Some(url) = &services.reranker_url {
        strategies.push(Arc::new(HttpCrossEncoder::new(url.clone())));
    }
    if let Some(model) = &services.similarity_model {
        let encoder = OllamaEmbeddingClient::new(services.ollama_url.clone(), model.clone());
        strategies.push(Arc::new(TransformerSimilarity::new(Arc::new(encoder))));
    }
    strategies.push(Arc::new(EmbeddingCosine::new(cache.clone())));

    let reranker = Reranker::new(strategies);
    info!(strategies = ?reranker.strategy_names(), "Reranker ready");

    Ok(RetrievalOrchestrator::new(
        cache,
        vectors,
        graph,
        reranker,
        config.retrieval.clone(),
    ))
}

async fn run_extract(config: &AppConfig, file: &Path, batch_size: usize, concurrency: usize) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let doc_id = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let chunks = paragraph_chunks(&doc_id, &text);
    info!(chunks = chunks.len(), file = %file.display(), "Extracting");

    let llm = OllamaClient::new(config.services.ollama_url.clone(), config.services.llm_model.clone());
    let extractor = Arc::new(EntityExtractor::new(Arc::new(llm), config.extraction.clone()));
    let coordinator = BatchExtractionCoordinator::new(extractor);

    let results = coordinator.extract_batch(&chunks, batch_size, concurrency).await;

    let output: Vec<_> = chunks
        .iter()
        .zip(&results)
        .map(|(chunk, result)| json!({ "chunk_id": chunk.id, "offset": chunk.offset, "result": result }))
        .collect();
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    config.retrieval.validate()?;
    info!(mode = ?config.mode, "Configuration loaded");

    match cli.command {
        Command::Retrieve {
            query,
            top_k,
            top_k_rerank,
        } => {
            let orchestrator = build_orchestrator(&config).await?;
            let context = orchestrator
                .retrieve_context(
                    &query,
                    top_k.unwrap_or(config.retrieval.top_k),
                    top_k_rerank.unwrap_or(config.retrieval.top_k_rerank),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&context)?);
        }
        Command::Extract {
            file,
            batch_size,
            concurrency,
        } => {
            run_extract(
                &config,
                &file,
                batch_size.unwrap_or(config.extraction.batch_size),
                concurrency.unwrap_or(config.extraction.concurrency_limit),
            )
            .await?;
        }
    }

    Ok(())
}
