//! CiteRAG - retrieval-augmented question answering with numbered citations
//!
//! # Architecture
//!
//! ```text
//! Document -> Chunker -> Embedder -> VectorIndex
//!                                        |
//! Query -> Embedder -> Retriever <-------+
//!                          |
//!                      Reranker -> CitedContext -> Generator
//!                                       |              |
//!                                   Citations <---- Answer
//! ```
//!
//! # Example
//!
//! ```ignore
//! use citerag_lib::config::Settings;
//! use citerag_lib::pipeline::{IngestRequest, QueryRequest, RagPipeline};
//!
//! let mut settings = Settings::default();
//! settings.generation.api_key = Some(std::env::var("GROQ_API_KEY")?);
//! let pipeline = RagPipeline::from_settings(&settings)?;
//!
//! // Index a document
//! pipeline.ingest(&IngestRequest {
//!     content: std::fs::read_to_string("handbook.md")?,
//!     source: "handbook.md".into(),
//!     title: "Employee Handbook".into(),
//!     section: None,
//! })?;
//!
//! // Ask
//! let response = pipeline.query(&QueryRequest { query: "How many days of leave?".into() })?;
//! println!("{}", response.answer);
//! ```

pub mod chunk;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod generate;
mod http;
pub mod pipeline;
pub mod rerank;
pub mod retrieve;
pub mod store;

pub use error::{Error, Result};
