//! Ingestion and question answering over the configured components
//!
//! ```text
//! ingest: text -> Chunker -> Embedder (document mode, one batch) -> VectorIndex::upsert
//! query:  question -> Retriever -> Reranker -> CitedContext -> Generator -> citations
//! ```
//!
//! Components are constructed once and shared by reference; pipelines
//! running concurrently share nothing mutable except the index.
//!
//! # Usage
//!
//! ```ignore
//! use citerag_lib::config::Settings;
//! use citerag_lib::pipeline::{IngestRequest, QueryRequest, RagPipeline};
//!
//! let pipeline = RagPipeline::from_settings(&settings)?;
//! pipeline.ingest(&IngestRequest { content, source: "handbook.md".into(), title: "Handbook".into(), section: None })?;
//! let response = pipeline.query(&QueryRequest { query: "How do refunds work?".into() })?;
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chunk::{ChunkMetadata, Chunker, RecursiveChunker};
use crate::config::{RetrievalSettings, Settings};
use crate::context::{Citation, CitedContext};
use crate::embed::{self, EmbedMode, Embedder};
use crate::generate::{self, Generator};
use crate::rerank::{self, RerankedDocument, Reranker};
use crate::retrieve::Retriever;
use crate::store::{self, EmbeddedChunk, VectorIndex};
use crate::{Error, Result};

/// A document to add to the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub content: String,
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub chunks_created: usize,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

/// A passage the answer was generated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    /// Rerank score when reranking succeeded, otherwise retrieval similarity
    pub score: f32,
    pub metadata: ChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl From<RerankedDocument> for SourceDocument {
    fn from(doc: RerankedDocument) -> Self {
        let score = doc.effective_score();
        Self {
            id: doc.document.id,
            score,
            metadata: doc.document.metadata,
            rerank_score: doc.rerank_score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub sources: Vec<SourceDocument>,
    /// Wall-clock seconds spent answering
    pub execution_time: f64,
    /// Whitespace-separated words in answer + context; not a tokenizer count
    pub token_estimate: usize,
}

/// The assembled retrieval-augmented answering pipeline.
pub struct RagPipeline {
    chunker: RecursiveChunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    retriever: Retriever,
    reranker: Reranker,
    generator: Arc<dyn Generator>,
    retrieval: RetrievalSettings,
}

impl RagPipeline {
    /// Assemble a pipeline from already-built components.
    ///
    /// Fails if the embedder and index disagree on vector dimension.
    pub fn new(
        chunker: RecursiveChunker,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        reranker: Reranker,
        generator: Arc<dyn Generator>,
        retrieval: RetrievalSettings,
    ) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(Error::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimension(),
            });
        }

        Ok(Self {
            chunker,
            retriever: Retriever::new(Arc::clone(&embedder), Arc::clone(&index)),
            embedder,
            index,
            reranker,
            generator,
            retrieval,
        })
    }

    /// Validate `settings` and build every component it selects.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let chunker =
            RecursiveChunker::new(settings.chunking.chunk_size, settings.chunking.overlap)?;
        let embedder = embed::from_settings(&settings.embedding)?;
        let index = store::from_settings(&settings.index, settings.embedding.dimension)?;
        let reranker = rerank::from_settings(&settings.rerank)?;
        let generator = generate::from_settings(&settings.generation)?;

        info!(
            embedder = embedder.model_name(),
            index = index.name(),
            reranker = %settings.rerank.backend,
            generator = generator.model_name(),
            "pipeline ready"
        );

        Self::new(
            chunker,
            embedder,
            index,
            reranker,
            generator,
            settings.retrieval.clone(),
        )
    }

    /// Chunk, embed and store a document.
    ///
    /// All chunks are embedded in one batch and written in one upsert; if
    /// either fails nothing is reported as stored and the request can be
    /// retried as a whole.
    pub fn ingest(&self, request: &IngestRequest) -> Result<IngestResponse> {
        if request.source.trim().is_empty() {
            return Err(Error::InvalidInput("source must not be empty".to_string()));
        }

        let chunks = self.chunker.chunk(
            &request.content,
            &request.source,
            &request.title,
            request.section.as_deref(),
        );

        if !chunks.is_empty() {
            let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
            let embeddings = self.embedder.embed_batch(&texts, EmbedMode::Document)?;
            if embeddings.len() != chunks.len() {
                return Err(Error::Embedding(format!(
                    "embedder returned {} vectors for {} chunks",
                    embeddings.len(),
                    chunks.len()
                )));
            }

            let embedded: Vec<EmbeddedChunk> = chunks
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
                .collect();
            self.index.upsert(&embedded)?;

            info!(source = %request.source, chunks = embedded.len(), "ingested document");
            return Ok(IngestResponse {
                status: "success".to_string(),
                chunks_created: embedded.len(),
                source: request.source.clone(),
            });
        }

        info!(source = %request.source, "document produced no chunks");
        Ok(IngestResponse {
            status: "success".to_string(),
            chunks_created: 0,
            source: request.source.clone(),
        })
    }

    /// Answer a question from the indexed documents.
    ///
    /// Retrieval and generation failures fail the whole request; reranker
    /// failures only cost ranking quality.
    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let start = Instant::now();

        let query = request.query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }

        let retrieved = self.retriever.retrieve(query, self.retrieval.retrieve_top_k)?;
        let reranked = self
            .reranker
            .rerank(query, &retrieved, self.retrieval.rerank_top_k);

        let cited = CitedContext::new(reranked);
        let context = cited.text();
        let answer = self.generator.generate(query, &context)?;
        let (answer, citations) = cited.cite(answer);

        let token_estimate =
            answer.split_whitespace().count() + context.split_whitespace().count();
        let sources: Vec<SourceDocument> = cited
            .into_documents()
            .into_iter()
            .map(SourceDocument::from)
            .collect();
        let execution_time = start.elapsed().as_secs_f64();

        info!(
            retrieved = retrieved.len(),
            sources = sources.len(),
            execution_time,
            "answered query"
        );

        Ok(QueryResponse {
            answer,
            citations,
            sources,
            execution_time,
            token_estimate,
        })
    }

    #[must_use]
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }
}

#[cfg(test)]
mod tests {
    use std::hash::{DefaultHasher, Hash, Hasher};
    use std::sync::Mutex;

    use super::*;
    use crate::embed::{check_inputs, Embedding};
    use crate::generate::{is_refusal, REFUSAL};
    use crate::rerank::{RelevanceScore, RelevanceScorer};
    use crate::store::MemoryIndex;

    const DIM: usize = 64;

    const HANDBOOK: &str = "Alpha paragraph talks about apples and orchards.\n\n\
        Beta paragraph covers bicycles and gears.\n\n\
        Gamma paragraph explains glaciers and ice.\n\n\
        Delta paragraph describes deserts and dunes.";

    /// Bag-of-words feature hashing: identical texts embed identically.
    struct HashEmbedder;

    impl Embedder for HashEmbedder {
        fn embed_batch(&self, texts: &[&str], _mode: EmbedMode) -> Result<Vec<Embedding>> {
            check_inputs(texts)?;
            Ok(texts.iter().map(|t| hash_embed(t)).collect())
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_name(&self) -> &str {
            "hash"
        }
    }

    fn hash_embed(text: &str) -> Embedding {
        let mut vector = vec![0.0; DIM];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            vector[(hasher.finish() % DIM as u64) as usize] += 1.0;
        }
        vector
    }

    struct DownEmbedder;

    impl Embedder for DownEmbedder {
        fn embed_batch(&self, _texts: &[&str], _mode: EmbedMode) -> Result<Vec<Embedding>> {
            Err(Error::ServiceUnavailable {
                service: "embedding",
                reason: "connection refused".to_string(),
            })
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_name(&self) -> &str {
            "down"
        }
    }

    /// Refuses on empty context, otherwise cites the first block.
    #[derive(Default)]
    struct StubGenerator {
        contexts: Mutex<Vec<String>>,
    }

    impl Generator for StubGenerator {
        fn generate(&self, _query: &str, context: &str) -> Result<String> {
            self.contexts.lock().unwrap().push(context.to_string());
            if context.is_empty() {
                Ok(REFUSAL.to_string())
            } else {
                Ok("According to the handbook [1].".to_string())
            }
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    struct DownGenerator;

    impl Generator for DownGenerator {
        fn generate(&self, _query: &str, _context: &str) -> Result<String> {
            Err(Error::Generation("request timed out after 30s".to_string()))
        }

        fn model_name(&self) -> &str {
            "down"
        }
    }

    struct TimeoutScorer;

    impl RelevanceScorer for TimeoutScorer {
        fn score(&self, _query: &str, _documents: &[&str], _top_n: usize) -> Result<Vec<RelevanceScore>> {
            Err(Error::Rerank("request timed out after 30s".to_string()))
        }

        fn name(&self) -> &str {
            "timeout"
        }
    }

    /// Scores passages by length, longest first.
    struct LengthScorer;

    impl RelevanceScorer for LengthScorer {
        fn score(&self, _query: &str, documents: &[&str], top_n: usize) -> Result<Vec<RelevanceScore>> {
            let mut scores: Vec<RelevanceScore> = documents
                .iter()
                .enumerate()
                .map(|(index, d)| RelevanceScore {
                    index,
                    relevance_score: d.len() as f32,
                })
                .collect();
            scores.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
            scores.truncate(top_n);
            Ok(scores)
        }

        fn name(&self) -> &str {
            "length"
        }
    }

    fn pipeline_with(
        embedder: Arc<dyn Embedder>,
        reranker: Reranker,
        generator: Arc<dyn Generator>,
        rerank_top_k: usize,
    ) -> RagPipeline {
        RagPipeline::new(
            RecursiveChunker::new(60, 10).unwrap(),
            embedder,
            Arc::new(MemoryIndex::new(DIM)),
            reranker,
            generator,
            RetrievalSettings {
                retrieve_top_k: 10,
                rerank_top_k,
            },
        )
        .unwrap()
    }

    fn pipeline(reranker: Reranker) -> RagPipeline {
        pipeline_with(
            Arc::new(HashEmbedder),
            reranker,
            Arc::new(StubGenerator::default()),
            5,
        )
    }

    fn handbook() -> IngestRequest {
        IngestRequest {
            content: HANDBOOK.to_string(),
            source: "handbook".to_string(),
            title: "Handbook".to_string(),
            section: None,
        }
    }

    fn ask(query: &str) -> QueryRequest {
        QueryRequest {
            query: query.to_string(),
        }
    }

    #[test]
    fn test_ingest_then_exact_match_ranks_first() {
        let pipeline = pipeline(Reranker::disabled());

        let response = pipeline.ingest(&handbook()).unwrap();
        assert_eq!(response.status, "success");
        assert_eq!(response.chunks_created, 4);
        assert_eq!(response.source, "handbook");

        // contiguous positions and derived ids
        let all = pipeline
            .index()
            .query(&hash_embed("paragraph"), 10)
            .unwrap();
        let mut positions: Vec<usize> = all.iter().map(|d| d.metadata.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        for doc in &all {
            assert_eq!(doc.id, format!("handbook_{}", doc.metadata.position));
        }

        let answer = pipeline
            .query(&ask("Gamma paragraph explains glaciers and ice."))
            .unwrap();

        assert_eq!(answer.sources[0].id, "handbook_2");
        for other in &answer.sources[1..] {
            assert!(answer.sources[0].score >= other.score);
        }
        assert_eq!(answer.citations[0].index, 1);
        assert_eq!(answer.citations[0].source, "handbook");
        assert_eq!(answer.citations[0].title, "Handbook");
    }

    #[test]
    fn test_empty_index_refuses() {
        let generator = Arc::new(StubGenerator::default());
        let pipeline = pipeline_with(
            Arc::new(HashEmbedder),
            Reranker::disabled(),
            generator.clone(),
            5,
        );

        let response = pipeline.query(&ask("What is the refund policy?")).unwrap();

        assert!(response.sources.is_empty());
        assert!(response.citations.is_empty());
        assert_eq!(generator.contexts.lock().unwrap().as_slice(), &[String::new()]);
        assert_eq!(response.answer, REFUSAL);
        assert!(is_refusal(&response.answer));
    }

    #[test]
    fn test_reranker_timeout_still_answers() {
        let pipeline = pipeline_with(
            Arc::new(HashEmbedder),
            Reranker::new(Box::new(TimeoutScorer)),
            Arc::new(StubGenerator::default()),
            3,
        );
        pipeline.ingest(&handbook()).unwrap();

        let response = pipeline.query(&ask("glaciers and ice")).unwrap();

        assert_eq!(response.sources.len(), 3);
        assert!(response.sources.iter().all(|s| s.rerank_score.is_none()));
        assert_eq!(response.sources[0].id, "handbook_2");
        for window in response.sources.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        assert!(response.execution_time >= 0.0);
        assert!(response.execution_time.is_finite());
        assert_eq!(response.citations.len(), 3);
    }

    #[test]
    fn test_rerank_scores_replace_similarity() {
        let pipeline = pipeline_with(
            Arc::new(HashEmbedder),
            Reranker::new(Box::new(LengthScorer)),
            Arc::new(StubGenerator::default()),
            2,
        );
        pipeline.ingest(&handbook()).unwrap();

        let response = pipeline.query(&ask("paragraph")).unwrap();

        assert_eq!(response.sources.len(), 2);
        // the alpha paragraph is the longest
        assert_eq!(response.sources[0].id, "handbook_0");
        for source in &response.sources {
            assert_eq!(source.rerank_score, Some(source.score));
        }
    }

    #[test]
    fn test_citations_follow_source_order() {
        let pipeline = pipeline(Reranker::new(Box::new(LengthScorer)));
        pipeline.ingest(&handbook()).unwrap();
        pipeline
            .ingest(&IngestRequest {
                content: "Gamma rays are not glaciers.".to_string(),
                source: "physics".to_string(),
                title: "Physics".to_string(),
                section: Some("Radiation".to_string()),
            })
            .unwrap();

        let response = pipeline.query(&ask("gamma glaciers")).unwrap();

        assert_eq!(response.citations.len(), response.sources.len());
        for (citation, source) in response.citations.iter().zip(&response.sources) {
            assert_eq!(Some(&citation.source), source.metadata.source.as_ref());
            assert_eq!(Some(&citation.title), source.metadata.title.as_ref());
        }
    }

    #[test]
    fn test_token_estimate() {
        let generator = Arc::new(StubGenerator::default());
        let pipeline = pipeline_with(
            Arc::new(HashEmbedder),
            Reranker::disabled(),
            generator.clone(),
            1,
        );
        pipeline.ingest(&handbook()).unwrap();

        let response = pipeline.query(&ask("bicycles and gears")).unwrap();

        let context = generator.contexts.lock().unwrap()[0].clone();
        assert!(context.starts_with("[1] Handbook:\n"));
        assert_eq!(
            response.token_estimate,
            response.answer.split_whitespace().count() + context.split_whitespace().count()
        );
    }

    #[test]
    fn test_generation_failure_fails_query() {
        let pipeline = pipeline_with(
            Arc::new(HashEmbedder),
            Reranker::disabled(),
            Arc::new(DownGenerator),
            5,
        );
        pipeline.ingest(&handbook()).unwrap();

        let err = pipeline.query(&ask("glaciers")).unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[test]
    fn test_embedder_outage() {
        let pipeline = pipeline_with(
            Arc::new(DownEmbedder),
            Reranker::disabled(),
            Arc::new(StubGenerator::default()),
            5,
        );

        let err = pipeline.ingest(&handbook()).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, Error::ServiceUnavailable { .. }));

        let err = pipeline.query(&ask("glaciers")).unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable { .. }));
    }

    #[test]
    fn test_reingest_overwrites() {
        let pipeline = pipeline(Reranker::disabled());
        pipeline.ingest(&handbook()).unwrap();
        pipeline.ingest(&handbook()).unwrap();

        let all = pipeline.index().query(&hash_embed("paragraph"), 100).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_ingest_validation() {
        let pipeline = pipeline(Reranker::disabled());

        let mut request = handbook();
        request.source = "  ".to_string();
        assert!(matches!(pipeline.ingest(&request), Err(Error::InvalidInput(_))));

        let mut request = handbook();
        request.content = "\n\n".to_string();
        assert_eq!(pipeline.ingest(&request).unwrap().chunks_created, 0);

        assert!(matches!(pipeline.query(&ask("   ")), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let result = RagPipeline::new(
            RecursiveChunker::new(60, 10).unwrap(),
            Arc::new(HashEmbedder),
            Arc::new(MemoryIndex::new(DIM + 1)),
            Reranker::disabled(),
            Arc::new(StubGenerator::default()),
            RetrievalSettings::default(),
        );
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_response_serialization() {
        let pipeline = pipeline(Reranker::disabled());
        pipeline.ingest(&handbook()).unwrap();

        let response = pipeline.query(&ask("deserts and dunes")).unwrap();
        let json = serde_json::to_value(&response).unwrap();

        for key in ["answer", "citations", "sources", "execution_time", "token_estimate"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        let source = &json["sources"][0];
        assert!(source.get("rerank_score").is_none());
        assert_eq!(source["metadata"]["source"], "handbook");
    }
}
