//! First-stage retrieval: embed the query, ask the index for neighbours.

use std::sync::Arc;

use tracing::debug;

use crate::embed::{EmbedMode, Embedder};
use crate::store::{ScoredDocument, VectorIndex};
use crate::Result;

/// Fetches candidate passages for a query by embedding similarity.
///
/// Stateless between calls: every call embeds the query and issues exactly
/// one index query. Embedder and index errors are returned unchanged.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Top-k passages for `query`, most similar first.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredDocument>> {
        let vector = self.embedder.embed_one(query, EmbedMode::Query)?;
        let documents = self.index.query(&vector, top_k)?;

        debug!(
            index = self.index.name(),
            top_k,
            found = documents.len(),
            "retrieved candidates"
        );
        Ok(documents)
    }
}
