//! Text embedding
//!
//! Two kinds of embedders are interchangeable behind [`Embedder`]:
//!
//! - asymmetric models encode documents and queries differently (a query
//!   prefix, or a provider `input_type`), but into the same vector space
//! - symmetric models ignore [`EmbedMode`] entirely
//!
//! Every vector an embedder returns has exactly [`Embedder::dimension`]
//! components, and batch output is in input order. Empty input is an error;
//! an embedder never substitutes a zero vector.
//!
//! # Usage
//!
//! ```ignore
//! use citerag_lib::embed::{EmbedMode, Embedder, LocalEmbedder, LocalModel};
//!
//! let embedder = LocalEmbedder::new(LocalModel::BgeSmallEnV15)?;
//!
//! // Embed documents (for indexing)
//! let doc_embeddings = embedder.embed_batch(&["Refund policy...", "Shipping..."], EmbedMode::Document)?;
//!
//! // Embed query (for searching)
//! let query_embedding = embedder.embed_one("How do refunds work?", EmbedMode::Query)?;
//! ```

use std::sync::Arc;

use crate::config::{EmbeddingBackend, EmbeddingSettings};
use crate::{Error, Result};

/// A vector embedding - fixed size array of floats
pub type Embedding = Vec<f32>;

/// Which side of retrieval a text is embedded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    /// Passages stored in the index
    Document,
    /// Search queries
    Query,
}

/// Trait for text embedding models
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per text in input order.
    fn embed_batch(&self, texts: &[&str], mode: EmbedMode) -> Result<Vec<Embedding>>;

    /// Embed a single text.
    ///
    /// Equivalent to a one-element [`embed_batch`](Self::embed_batch).
    fn embed_one(&self, text: &str, mode: EmbedMode) -> Result<Embedding> {
        self.embed_batch(&[text], mode)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("model returned no embeddings".to_string()))
    }

    /// Returns the embedding dimension
    fn dimension(&self) -> usize;

    /// Returns the model name/identifier
    fn model_name(&self) -> &str;
}

/// Rejects batches containing empty or whitespace-only texts.
pub(crate) fn check_inputs(texts: &[&str]) -> Result<()> {
    match texts.iter().position(|t| t.trim().is_empty()) {
        Some(i) => Err(Error::Embedding(format!("cannot embed empty text (input {i})"))),
        None => Ok(()),
    }
}

/// Verifies the model produced one vector of the right dimension per input.
pub(crate) fn check_outputs(
    embeddings: &[Embedding],
    expected_len: usize,
    dimension: usize,
) -> Result<()> {
    if embeddings.len() != expected_len {
        return Err(Error::Embedding(format!(
            "model returned {} embeddings for {} inputs",
            embeddings.len(),
            expected_len
        )));
    }

    match embeddings.iter().find(|e| e.len() != dimension) {
        Some(e) => Err(Error::DimensionMismatch {
            expected: dimension,
            actual: e.len(),
        }),
        None => Ok(()),
    }
}

/// Construct the embedder selected in `settings`.
pub fn from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match settings.backend {
        EmbeddingBackend::Local => {
            let model: LocalModel = settings.model.parse()?;
            if model.dimension() != settings.dimension {
                return Err(Error::Config(format!(
                    "{} produces {}-dimensional vectors but the index is configured for {}",
                    model.model_id(),
                    model.dimension(),
                    settings.dimension
                )));
            }
            Arc::new(LocalEmbedder::new(model)?)
        }
        EmbeddingBackend::Cohere => Arc::new(CohereEmbedder::new(settings)?),
    };

    Ok(embedder)
}

mod cohere;
mod local;

pub use cohere::*;
pub use local::*;
