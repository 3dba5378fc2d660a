use std::str::FromStr;
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::debug;

use crate::embed::{check_inputs, check_outputs, EmbedMode, Embedder, Embedding};
use crate::{Error, Result};

/// BGE models use a special prompt prefix for queries to improve retrieval.
const BGE_QUERY_PREFIX: &str = "Represent this sentence for searching relevant passages: ";

/// Models available to [`LocalEmbedder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalModel {
    /// sentence-transformers/all-MiniLM-L6-v2, 384 dims, symmetric
    AllMiniLmL6V2,
    /// BAAI/bge-small-en-v1.5, 384 dims, asymmetric
    BgeSmallEnV15,
    /// BAAI/bge-large-en-v1.5, 1024 dims, asymmetric
    BgeLargeEnV15,
}

impl LocalModel {
    #[must_use]
    pub fn model_id(self) -> &'static str {
        match self {
            LocalModel::AllMiniLmL6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            LocalModel::BgeSmallEnV15 => "BAAI/bge-small-en-v1.5",
            LocalModel::BgeLargeEnV15 => "BAAI/bge-large-en-v1.5",
        }
    }

    #[must_use]
    pub fn dimension(self) -> usize {
        match self {
            LocalModel::AllMiniLmL6V2 | LocalModel::BgeSmallEnV15 => 384,
            LocalModel::BgeLargeEnV15 => 1024,
        }
    }

    /// Prefix applied to queries, `None` for symmetric models.
    #[must_use]
    pub fn query_prefix(self) -> Option<&'static str> {
        match self {
            LocalModel::AllMiniLmL6V2 => None,
            LocalModel::BgeSmallEnV15 | LocalModel::BgeLargeEnV15 => Some(BGE_QUERY_PREFIX),
        }
    }

    fn fastembed_model(self) -> EmbeddingModel {
        match self {
            LocalModel::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
            LocalModel::BgeSmallEnV15 => EmbeddingModel::BGESmallENV15,
            LocalModel::BgeLargeEnV15 => EmbeddingModel::BGELargeENV15,
        }
    }
}

impl FromStr for LocalModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.rsplit('/').next().unwrap_or(s).to_ascii_lowercase();
        match name.as_str() {
            "all-minilm-l6-v2" => Ok(LocalModel::AllMiniLmL6V2),
            "bge-small-en-v1.5" => Ok(LocalModel::BgeSmallEnV15),
            "bge-large-en-v1.5" => Ok(LocalModel::BgeLargeEnV15),
            _ => Err(Error::Config(format!("unsupported local embedding model: {s}"))),
        }
    }
}

/// In-process embedder backed by fastembed (ONNX runtime).
///
/// Runs without network access once the model is cached, so calls cannot
/// hang on a remote service.
pub struct LocalEmbedder {
    model: Mutex<TextEmbedding>,
    kind: LocalModel,
}

impl LocalEmbedder {
    /// Load a local embedding model.
    ///
    /// Downloads the model on first use (~90MB for MiniLM, ~1.2GB for BGE large).
    pub fn new(kind: LocalModel) -> Result<Self> {
        let opts = InitOptions::new(kind.fastembed_model()).with_show_download_progress(true);

        TextEmbedding::try_new(opts)
            .map(|model| Self {
                model: Mutex::new(model),
                kind,
            })
            .map_err(|e| Error::Embedding(e.to_string()))
    }
}

impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        self.kind.model_id()
    }

    fn dimension(&self) -> usize {
        self.kind.dimension()
    }

    fn embed_batch(&self, texts: &[&str], mode: EmbedMode) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        check_inputs(texts)?;

        let inputs: Vec<String> = match (mode, self.kind.query_prefix()) {
            (EmbedMode::Query, Some(prefix)) => {
                texts.iter().map(|t| format!("{prefix}{t}")).collect()
            }
            _ => texts.iter().map(|t| t.to_string()).collect(),
        };

        let embeddings = self
            .model
            .lock()
            .map_err(|_| Error::Embedding("embedding model lock poisoned".to_string()))?
            .embed(inputs, None)
            .map_err(|e| Error::Embedding(e.to_string()))?;

        check_outputs(&embeddings, texts.len(), self.dimension())?;
        debug!(model = self.model_name(), count = texts.len(), ?mode, "embedded batch");
        Ok(embeddings)
    }
}
