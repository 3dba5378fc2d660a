//! Vector index backends
//!
//! An index maps chunk id to (vector, metadata) and answers top-k nearest
//! neighbour queries. Backends are chosen once, at construction, from
//! [`IndexSettings`].
//!
//! # Storage Model
//!
//! Each stored entry consists of:
//! - id: `{source}_{position}`, the upsert key
//! - vector: exactly [`VectorIndex::dimension`] floats
//! - metadata: source, title, section, position, chunk_size and content
//!
//! # Guarantees
//!
//! - `upsert` overwrites by id and is all-or-nothing from the caller's point
//!   of view: on error the whole batch can be retried without duplicates.
//! - `query` returns at most `top_k` results ordered by descending score.
//! - A vector of the wrong dimension is rejected before anything is written.
//!
//! # Usage
//!
//! ```ignore
//! use citerag_lib::store::{MemoryIndex, VectorIndex};
//!
//! let index = MemoryIndex::new(384);
//! index.upsert(&embedded_chunks)?;
//! let results = index.query(&query_embedding, 5)?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkMetadata};
use crate::config::{IndexBackend, IndexSettings};
use crate::embed::Embedding;
use crate::{Error, Result};

/// A chunk together with its embedding, ready to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

/// A query result with similarity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    /// Chunk id
    pub id: String,
    /// Similarity score (higher is more similar)
    /// For cosine similarity: -1.0 to 1.0
    pub score: f32,
    /// Metadata stored with the chunk
    pub metadata: ChunkMetadata,
}

/// Trait for vector index backends
///
/// Implementations must be safe to share between concurrent ingestion and
/// query pipelines.
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite chunks by id.
    fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Top-k entries most similar to `vector`, highest score first.
    ///
    /// An empty index yields an empty result, not an error.
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>>;

    /// Vector length every entry must have
    fn dimension(&self) -> usize;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Rejects the batch if any vector has the wrong length.
pub(crate) fn check_dimensions(chunks: &[EmbeddedChunk], dimension: usize) -> Result<()> {
    match chunks.iter().find(|c| c.embedding.len() != dimension) {
        Some(c) => Err(Error::DimensionMismatch {
            expected: dimension,
            actual: c.embedding.len(),
        }),
        None => Ok(()),
    }
}

/// Construct the index selected in `settings`.
pub fn from_settings(settings: &IndexSettings, dimension: usize) -> Result<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = match settings.backend {
        IndexBackend::Memory => match &settings.snapshot {
            Some(path) => Arc::new(MemoryIndex::open(path, dimension)?),
            None => Arc::new(MemoryIndex::new(dimension)),
        },
        IndexBackend::Pinecone => Arc::new(PineconeIndex::new(settings, dimension)?),
    };

    Ok(index)
}

mod memory;
mod pinecone;

pub use memory::*;
pub use pinecone::*;
