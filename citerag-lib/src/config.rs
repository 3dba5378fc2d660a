//! Pipeline configuration
//!
//! [`Settings`] holds values only; the CLI fills it from flags and
//! environment variables. Defaults match a small single-node deployment:
//! MiniLM embeddings (384 dims), 1000-character chunks with 100 characters
//! of overlap, 10 candidates reranked down to 5.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_RETRIEVE_TOP_K: usize = 10;
pub const DEFAULT_RERANK_TOP_K: usize = 5;
pub const DEFAULT_RERANK_MODEL: &str = "rerank-english-v3.0";
pub const DEFAULT_GENERATION_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_GENERATION_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_COHERE_URL: &str = "https://api.cohere.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub index: IndexSettings,
    pub rerank: RerankSettings,
    pub generation: GenerationSettings,
}

impl Settings {
    /// Check the settings are coherent before any component is built.
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.overlap >= chunking.chunk_size {
            return Err(Error::Chunking(format!(
                "overlap must be smaller than chunk size (overlap {}, chunk size {})",
                chunking.overlap, chunking.chunk_size
            )));
        }

        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding dimension must be non-zero".to_string()));
        }
        if self.embedding.backend == EmbeddingBackend::Cohere {
            require(&self.embedding.api_key, "embedding API key")?;
        }

        let retrieval = &self.retrieval;
        if retrieval.retrieve_top_k == 0 || retrieval.rerank_top_k == 0 {
            return Err(Error::Config("top_k values must be non-zero".to_string()));
        }
        if retrieval.rerank_top_k > retrieval.retrieve_top_k {
            return Err(Error::Config(format!(
                "rerank top_k ({}) cannot exceed retrieval top_k ({})",
                retrieval.rerank_top_k, retrieval.retrieve_top_k
            )));
        }

        if self.index.backend == IndexBackend::Pinecone {
            require(&self.index.api_key, "Pinecone API key")?;
            require(&self.index.host, "Pinecone index host")?;
        }

        if self.rerank.backend == RerankBackend::Cohere {
            require(&self.rerank.api_key, "reranker API key")?;
        }

        require(&self.generation.api_key, "generation API key")?;

        Ok(())
    }
}

fn require(value: &Option<String>, what: &str) -> Result<()> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(Error::Config(format!("missing {what}"))),
    }
}

/// Which embedder to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingBackend {
    /// In-process fastembed model
    #[default]
    Local,
    /// Cohere embed API
    Cohere,
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model: String,
    /// Vector length every stored entry must have
    pub dimension: usize,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Inputs per remote request
    pub batch_size: usize,
    pub timeout: Duration,
    pub max_attempts: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            base_url: DEFAULT_COHERE_URL.to_string(),
            api_key: None,
            batch_size: 96,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkingSettings {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    /// Candidates fetched from the index
    pub retrieve_top_k: usize,
    /// Passages kept after reranking and handed to the generator
    pub rerank_top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            retrieve_top_k: DEFAULT_RETRIEVE_TOP_K,
            rerank_top_k: DEFAULT_RERANK_TOP_K,
        }
    }
}

/// Which vector index to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexBackend {
    #[default]
    Memory,
    Pinecone,
}

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub backend: IndexBackend,
    /// JSON snapshot loaded at startup and saved after ingestion (memory only)
    pub snapshot: Option<PathBuf>,
    /// Pinecone index host, e.g. `https://docs-abc123.svc.us-east-1.pinecone.io`
    pub host: Option<String>,
    pub api_key: Option<String>,
    pub namespace: Option<String>,
    pub timeout: Duration,
    pub max_attempts: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            snapshot: None,
            host: None,
            api_key: None,
            namespace: None,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 3,
        }
    }
}

/// Which relevance scorer backs the reranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RerankBackend {
    /// Keep retrieval order
    #[default]
    None,
    /// In-process fastembed cross-encoder
    Local,
    /// Cohere rerank API
    Cohere,
}

#[derive(Debug, Clone)]
pub struct RerankSettings {
    pub backend: RerankBackend,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            backend: RerankBackend::None,
            model: DEFAULT_RERANK_MODEL.to_string(),
            base_url: DEFAULT_COHERE_URL.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GENERATION_URL.to_string(),
            api_key: None,
            model: DEFAULT_GENERATION_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: 1000,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

macro_rules! backend_names {
    ($ty:ty, $what:literal, { $($variant:path => $name:literal),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    other => Err(Error::Config(format!(concat!("unknown ", $what, ": {}"), other))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $($variant => $name,)+
                };
                f.write_str(name)
            }
        }
    };
}

backend_names!(EmbeddingBackend, "embedding backend", {
    EmbeddingBackend::Local => "local",
    EmbeddingBackend::Cohere => "cohere",
});

backend_names!(IndexBackend, "index backend", {
    IndexBackend::Memory => "memory",
    IndexBackend::Pinecone => "pinecone",
});

backend_names!(RerankBackend, "rerank backend", {
    RerankBackend::None => "none",
    RerankBackend::Local => "local",
    RerankBackend::Cohere => "cohere",
});

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Settings {
        let mut settings = Settings::default();
        settings.generation.api_key = Some("gsk-test".to_string());
        settings
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        let mut settings = valid();
        settings.chunking.overlap = settings.chunking.chunk_size;
        assert!(matches!(settings.validate(), Err(Error::Chunking(_))));
    }

    #[test]
    fn test_rerank_top_k_bounded_by_retrieval() {
        let mut settings = valid();
        settings.retrieval.rerank_top_k = 20;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_remote_backends_need_credentials() {
        let mut settings = valid();
        settings.index.backend = IndexBackend::Pinecone;
        settings.index.host = Some("https://docs.svc.pinecone.io".to_string());
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("Pinecone API key"));

        settings.index.api_key = Some("pc-key".to_string());
        assert!(settings.validate().is_ok());

        settings.rerank.backend = RerankBackend::Cohere;
        settings.rerank.api_key = Some("  ".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_generation_key() {
        assert!(Settings::default().validate().is_err());
    }

    #[test]
    fn test_backend_names_round_trip() {
        assert_eq!("Pinecone".parse::<IndexBackend>().unwrap(), IndexBackend::Pinecone);
        assert_eq!("none".parse::<RerankBackend>().unwrap(), RerankBackend::None);
        assert_eq!(EmbeddingBackend::Cohere.to_string(), "cohere");
        assert!("weaviate".parse::<IndexBackend>().is_err());
    }
}
