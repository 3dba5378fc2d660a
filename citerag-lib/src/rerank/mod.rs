//! Second-stage reranking with a cross-encoder
//!
//! A [`RelevanceScorer`] scores (query, passage) pairs jointly, on a scale
//! unrelated to embedding similarity. [`Reranker`] wraps a scorer with the
//! pipeline's availability rule: reranking improves ordering but is never
//! required, so any scorer failure (timeout, auth, malformed or out-of-range
//! results) is logged and the candidates are returned in retrieval order,
//! truncated to `top_k` and without a rerank score.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{RerankBackend, RerankSettings};
use crate::store::ScoredDocument;
use crate::{Error, Result};

/// One scored passage, referring to its position in the scored batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceScore {
    pub index: usize,
    pub relevance_score: f32,
}

/// A cross-encoder relevance scoring service.
pub trait RelevanceScorer: Send + Sync {
    /// Score all `documents` against `query` in one call and return the best
    /// `top_n`, most relevant first.
    fn score(&self, query: &str, documents: &[&str], top_n: usize) -> Result<Vec<RelevanceScore>>;

    /// Scorer name for logs
    fn name(&self) -> &str;
}

/// A retrieved document after reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankedDocument {
    #[serde(flatten)]
    pub document: ScoredDocument,
    /// Cross-encoder relevance; absent when reranking was skipped or failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl RerankedDocument {
    /// Keep a retrieved document as-is, without a rerank score.
    #[must_use]
    pub fn unscored(document: ScoredDocument) -> Self {
        Self {
            document,
            rerank_score: None,
        }
    }

    /// Rerank score when present, otherwise the retrieval similarity.
    #[must_use]
    pub fn effective_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.document.score)
    }
}

/// Reorders retrieval candidates by cross-encoder relevance, degrading to
/// retrieval order when the scorer is missing or fails.
pub struct Reranker {
    scorer: Option<Box<dyn RelevanceScorer>>,
}

impl Reranker {
    #[must_use]
    pub fn new(scorer: Box<dyn RelevanceScorer>) -> Self {
        Self {
            scorer: Some(scorer),
        }
    }

    /// A reranker that always keeps retrieval order.
    #[must_use]
    pub fn disabled() -> Self {
        Self { scorer: None }
    }

    /// Best `top_k` of `documents` for `query`.
    ///
    /// The input is not modified; returned documents are copies. Never
    /// fails: see the module docs for the fallback.
    pub fn rerank(
        &self,
        query: &str,
        documents: &[ScoredDocument],
        top_k: usize,
    ) -> Vec<RerankedDocument> {
        if documents.is_empty() {
            return Vec::new();
        }

        let Some(scorer) = &self.scorer else {
            return retrieval_order(documents, top_k);
        };

        let top_n = top_k.min(documents.len());
        let texts: Vec<&str> = documents.iter().map(rerank_text).collect();

        let scores = scorer
            .score(query, &texts, top_n)
            .and_then(|scores| validate(scores, documents.len(), top_n));

        match scores {
            Ok(scores) => {
                debug!(scorer = scorer.name(), reranked = scores.len(), "reranked candidates");
                scores
                    .into_iter()
                    .map(|s| RerankedDocument {
                        document: documents[s.index].clone(),
                        rerank_score: Some(s.relevance_score),
                    })
                    .collect()
            }
            Err(e) => {
                warn!(
                    scorer = scorer.name(),
                    error = %e,
                    kept = top_n,
                    "reranking failed, keeping retrieval order"
                );
                retrieval_order(documents, top_k)
            }
        }
    }
}

/// Construct the reranker selected in `settings`.
pub fn from_settings(settings: &RerankSettings) -> Result<Reranker> {
    let reranker = match settings.backend {
        RerankBackend::None => Reranker::disabled(),
        RerankBackend::Local => Reranker::new(Box::new(LocalScorer::new()?)),
        RerankBackend::Cohere => Reranker::new(Box::new(CohereScorer::new(settings)?)),
    };

    Ok(reranker)
}

fn retrieval_order(documents: &[ScoredDocument], top_k: usize) -> Vec<RerankedDocument> {
    documents
        .iter()
        .take(top_k)
        .cloned()
        .map(RerankedDocument::unscored)
        .collect()
}

/// Text the cross-encoder sees: the stored content, else the source name.
fn rerank_text(document: &ScoredDocument) -> &str {
    let metadata = &document.metadata;
    [metadata.content.as_deref(), metadata.source.as_deref()]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

/// Accepts only distinct in-range indices with finite scores, at least
/// `top_n` of them; returns the best `top_n` sorted by relevance.
fn validate(
    mut scores: Vec<RelevanceScore>,
    len: usize,
    top_n: usize,
) -> Result<Vec<RelevanceScore>> {
    let mut seen = vec![false; len];
    for s in &scores {
        if s.index >= len {
            return Err(Error::Rerank(format!(
                "index {} out of range for {len} documents",
                s.index
            )));
        }
        if std::mem::replace(&mut seen[s.index], true) {
            return Err(Error::Rerank(format!("duplicate index {}", s.index)));
        }
        if !s.relevance_score.is_finite() {
            return Err(Error::Rerank(format!("non-finite score for index {}", s.index)));
        }
    }

    if scores.len() < top_n {
        return Err(Error::Rerank(format!(
            "expected {top_n} results, got {}",
            scores.len()
        )));
    }

    scores.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    scores.truncate(top_n);
    Ok(scores)
}

mod cohere;
mod local;

pub use cohere::*;
pub use local::*;
