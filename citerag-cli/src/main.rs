//! CiteRAG CLI - ingest documents and ask cited questions
//!
//! # Commands
//!
//! ```bash
//! # Chunk a document and show results
//! citerag chunk handbook.md --title "Employee Handbook"
//!
//! # Embed text and show vector stats
//! citerag embed "How many days of leave?" --query
//!
//! # Ingest into a persistent local index
//! citerag --index-file index.json ingest handbook.md --title "Employee Handbook"
//!
//! # Ask against it (needs GROQ_API_KEY)
//! citerag --index-file index.json ask "How many days of leave?"
//!
//! # Demo: ingest a file and ask in one go
//! citerag demo handbook.md "How many days of leave?"
//! ```
//!
//! Every setting can also be given through the environment variable shown in
//! `--help`; set `RUST_LOG=info` for pipeline logs.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use citerag_lib::{
    chunk::{Chunker, RecursiveChunker},
    config::{
        self, ChunkingSettings, EmbeddingBackend, EmbeddingSettings, GenerationSettings,
        IndexBackend, IndexSettings, RerankBackend, RerankSettings, RetrievalSettings, Settings,
    },
    embed::{self, EmbedMode},
    pipeline::{IngestRequest, QueryRequest, RagPipeline},
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "citerag")]
#[command(about = "Retrieval-augmented question answering with numbered citations")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SettingsArgs {
    /// Embedding backend: "local" or "cohere"
    #[arg(long, env = "CITERAG_EMBEDDING_BACKEND", default_value = "local", global = true)]
    embedding_backend: EmbeddingBackend,

    /// Embedding model identifier
    #[arg(long, env = "CITERAG_EMBEDDING_MODEL", default_value = config::DEFAULT_EMBEDDING_MODEL, global = true)]
    embedding_model: String,

    /// Embedding vector dimension
    #[arg(long, env = "CITERAG_EMBEDDING_DIMENSION", default_value_t = config::DEFAULT_EMBEDDING_DIMENSION, global = true)]
    embedding_dimension: usize,

    /// Cohere API key (embedding and rerank)
    #[arg(long, env = "COHERE_API_KEY", hide_env_values = true, global = true)]
    cohere_api_key: Option<String>,

    /// Cohere API base URL
    #[arg(long, env = "CITERAG_COHERE_URL", default_value = config::DEFAULT_COHERE_URL, global = true)]
    cohere_url: String,

    /// Maximum chunk length in characters
    #[arg(long, env = "CITERAG_CHUNK_SIZE", default_value_t = config::DEFAULT_CHUNK_SIZE, global = true)]
    chunk_size: usize,

    /// Characters shared between adjacent chunks
    #[arg(long, env = "CITERAG_CHUNK_OVERLAP", default_value_t = config::DEFAULT_CHUNK_OVERLAP, global = true)]
    chunk_overlap: usize,

    /// Candidates fetched from the index
    #[arg(long, env = "CITERAG_RETRIEVE_TOP_K", default_value_t = config::DEFAULT_RETRIEVE_TOP_K, global = true)]
    retrieve_top_k: usize,

    /// Passages kept after reranking
    #[arg(long, env = "CITERAG_RERANK_TOP_K", default_value_t = config::DEFAULT_RERANK_TOP_K, global = true)]
    rerank_top_k: usize,

    /// Vector index: "memory" or "pinecone"
    #[arg(long, env = "CITERAG_INDEX_BACKEND", default_value = "memory", global = true)]
    index_backend: IndexBackend,

    /// JSON snapshot for the memory index
    #[arg(long, env = "CITERAG_INDEX_FILE", global = true)]
    index_file: Option<PathBuf>,

    /// Pinecone index host
    #[arg(long, env = "PINECONE_HOST", global = true)]
    pinecone_host: Option<String>,

    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true, global = true)]
    pinecone_api_key: Option<String>,

    #[arg(long, env = "PINECONE_NAMESPACE", global = true)]
    pinecone_namespace: Option<String>,

    /// Reranker: "none", "local" or "cohere"
    #[arg(long, env = "CITERAG_RERANK_BACKEND", default_value = "none", global = true)]
    rerank_backend: RerankBackend,

    /// Cohere rerank model
    #[arg(long, env = "CITERAG_RERANK_MODEL", default_value = config::DEFAULT_RERANK_MODEL, global = true)]
    rerank_model: String,

    /// OpenAI-compatible chat completions base URL
    #[arg(long, env = "CITERAG_GENERATION_URL", default_value = config::DEFAULT_GENERATION_URL, global = true)]
    generation_url: String,

    #[arg(long, env = "CITERAG_GENERATION_MODEL", default_value = config::DEFAULT_GENERATION_MODEL, global = true)]
    generation_model: String,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true, global = true)]
    generation_api_key: Option<String>,

    #[arg(long, env = "CITERAG_TEMPERATURE", default_value_t = 0.3, global = true)]
    temperature: f32,

    #[arg(long, env = "CITERAG_MAX_TOKENS", default_value_t = 1000, global = true)]
    max_tokens: usize,

    /// Per-request timeout for remote services, in seconds
    #[arg(long, env = "CITERAG_TIMEOUT_SECS", default_value_t = 30, global = true)]
    timeout_secs: u64,
}

impl SettingsArgs {
    fn into_settings(self) -> Settings {
        let timeout = Duration::from_secs(self.timeout_secs);

        Settings {
            embedding: EmbeddingSettings {
                backend: self.embedding_backend,
                model: self.embedding_model,
                dimension: self.embedding_dimension,
                base_url: self.cohere_url.clone(),
                api_key: self.cohere_api_key.clone(),
                timeout,
                ..EmbeddingSettings::default()
            },
            chunking: ChunkingSettings {
                chunk_size: self.chunk_size,
                overlap: self.chunk_overlap,
            },
            retrieval: RetrievalSettings {
                retrieve_top_k: self.retrieve_top_k,
                rerank_top_k: self.rerank_top_k,
            },
            index: IndexSettings {
                backend: self.index_backend,
                snapshot: self.index_file,
                host: self.pinecone_host,
                api_key: self.pinecone_api_key,
                namespace: self.pinecone_namespace,
                timeout,
                ..IndexSettings::default()
            },
            rerank: RerankSettings {
                backend: self.rerank_backend,
                model: self.rerank_model,
                base_url: self.cohere_url,
                api_key: self.cohere_api_key,
                timeout,
            },
            generation: GenerationSettings {
                base_url: self.generation_url,
                api_key: self.generation_api_key,
                model: self.generation_model,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                timeout,
            },
        }
    }
}

/// Where a document came from and how to label it.
#[derive(Args)]
struct DocumentArgs {
    /// Input file
    input: PathBuf,

    /// Source identifier (defaults to the file name)
    #[arg(long)]
    source: Option<String>,

    /// Document title (defaults to the file stem)
    #[arg(long)]
    title: Option<String>,

    /// Section label
    #[arg(long)]
    section: Option<String>,
}

impl DocumentArgs {
    fn into_request(self) -> Result<IngestRequest> {
        let content = fs::read_to_string(&self.input)
            .with_context(|| format!("reading {}", self.input.display()))?;

        Ok(IngestRequest {
            content,
            source: self
                .source
                .unwrap_or_else(|| file_label(&self.input, self.input.file_name())),
            title: self
                .title
                .unwrap_or_else(|| file_label(&self.input, self.input.file_stem())),
            section: self.section,
        })
    }
}

fn file_label(path: &Path, part: Option<&OsStr>) -> String {
    part.map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk a document and print the chunks
    Chunk {
        #[command(flatten)]
        document: DocumentArgs,
    },

    /// Embed text and show vector info
    Embed {
        /// Text to embed
        text: String,

        /// Embed as a search query rather than a document
        #[arg(short, long)]
        query: bool,
    },

    /// Chunk, embed and store a document
    Ingest {
        #[command(flatten)]
        document: DocumentArgs,
    },

    /// Answer a question from the indexed documents
    Ask {
        /// Question to answer
        question: String,
    },

    /// Demo: ingest a file and ask a question about it
    Demo {
        #[command(flatten)]
        document: DocumentArgs,

        /// Question to answer
        question: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings.into_settings();

    match cli.command {
        Commands::Chunk { document } => {
            let chunker =
                RecursiveChunker::new(settings.chunking.chunk_size, settings.chunking.overlap)?;
            let request = document.into_request()?;
            let chunks = chunker.chunk(
                &request.content,
                &request.source,
                &request.title,
                request.section.as_deref(),
            );

            eprintln!("Chunked '{}' into {} chunks", request.source, chunks.len());
            print_json(&chunks)?;
        }

        Commands::Embed { text, query } => {
            let embedder = embed::from_settings(&settings.embedding)?;
            let mode = if query { EmbedMode::Query } else { EmbedMode::Document };
            let embedding = embedder.embed_one(&text, mode)?;

            println!("Model: {}", embedder.model_name());
            println!("Mode: {mode:?}");
            println!("Dimensions: {}", embedding.len());
            println!("First 5 values: {:?}", &embedding[..embedding.len().min(5)]);
            println!("Min: {:.4}", embedding.iter().copied().fold(f32::INFINITY, f32::min));
            println!("Max: {:.4}", embedding.iter().copied().fold(f32::NEG_INFINITY, f32::max));
        }

        Commands::Ingest { document } => {
            if settings.index.backend == IndexBackend::Memory && settings.index.snapshot.is_none() {
                warn!("memory index without --index-file; ingested chunks will not be kept");
            }

            let pipeline = RagPipeline::from_settings(&settings)?;
            let response = pipeline.ingest(&document.into_request()?)?;
            print_json(&response)?;
        }

        Commands::Ask { question } => {
            let pipeline = RagPipeline::from_settings(&settings)?;
            let response = pipeline.query(&QueryRequest { query: question })?;
            print_json(&response)?;
        }

        Commands::Demo { document, question } => {
            let pipeline = RagPipeline::from_settings(&settings)?;

            let ingested = pipeline.ingest(&document.into_request()?)?;
            eprintln!(
                "Ingested {} chunks from '{}'",
                ingested.chunks_created, ingested.source
            );

            let response = pipeline.query(&QueryRequest { query: question })?;
            println!("{}\n", response.answer);
            for citation in &response.citations {
                println!("[{}] {} ({})", citation.index, citation.title, citation.source);
            }
            eprintln!(
                "\n{} sources, ~{} tokens, {:.2}s",
                response.sources.len(),
                response.token_estimate,
                response.execution_time
            );
        }
    }

    Ok(())
}
