use std::sync::Mutex;

use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

use crate::rerank::{RelevanceScore, RelevanceScorer};
use crate::{Error, Result};

/// In-process cross-encoder using BAAI/bge-reranker-base.
///
/// Scores query-document pairs together for more accurate relevance ranking
/// than bi-encoder similarity.
pub struct LocalScorer {
    model: Mutex<TextRerank>,
}

impl LocalScorer {
    /// Load the reranker model.
    ///
    /// Downloads the model on first use (~300MB).
    pub fn new() -> Result<Self> {
        let opts = RerankInitOptions::new(RerankerModel::BGERerankerBase)
            .with_show_download_progress(true);

        TextRerank::try_new(opts)
            .map(|model| Self {
                model: Mutex::new(model),
            })
            .map_err(|e| Error::Rerank(e.to_string()))
    }
}

impl RelevanceScorer for LocalScorer {
    fn name(&self) -> &str {
        "BAAI/bge-reranker-base"
    }

    fn score(&self, query: &str, documents: &[&str], top_n: usize) -> Result<Vec<RelevanceScore>> {
        let docs: Vec<&str> = documents.to_vec();

        // results come back sorted by score, carrying input indices
        let results = self
            .model
            .lock()
            .map_err(|_| Error::Rerank("reranker model lock poisoned".to_string()))?
            .rerank(query, &docs, false, None)
            .map_err(|e| Error::Rerank(e.to_string()))?;

        Ok(results
            .into_iter()
            .take(top_n)
            .map(|rr| RelevanceScore {
                index: rr.index,
                relevance_score: rr.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkMetadata;
    use crate::rerank::Reranker;
    use crate::store::ScoredDocument;

    fn make_doc(id: &str, content: &str) -> ScoredDocument {
        ScoredDocument {
            id: id.to_string(),
            score: 0.5,
            metadata: ChunkMetadata {
                content: Some(content.to_string()),
                ..ChunkMetadata::default()
            },
        }
    }

    #[test]
    #[ignore] // Requires model download, run with: cargo test -- --ignored
    fn test_relevant_scores_higher_than_irrelevant() {
        let scorer = LocalScorer::new().unwrap();

        let scores = scorer
            .score(
                "Who won the Ashes cricket series?",
                &[
                    "The weather in London was cloudy with occasional rain.",
                    "England won the Ashes series 4-1 against Australia in 2023.",
                ],
                2,
            )
            .unwrap();

        assert_eq!(scores[0].index, 1, "relevant passage should rank first");
        assert!(scores[0].relevance_score > scores[1].relevance_score);
    }

    #[test]
    #[ignore] // Requires model download
    fn test_rerank_respects_top_k() {
        let reranker = Reranker::new(Box::new(LocalScorer::new().unwrap()));

        let docs = vec![
            make_doc("1", "The stadium was packed with fans."),
            make_doc("2", "The final score was 3-2 after extra time."),
            make_doc("3", "Weather conditions were perfect for the match."),
            make_doc("4", "Tickets sold out within an hour."),
        ];

        let results = reranker.rerank("What was the final score?", &docs, 2);

        assert_eq!(results.len(), 2, "Should return exactly top_k results");
        assert_eq!(results[0].document.id, "2");
        assert!(results.iter().all(|r| r.rerank_score.is_some()));
    }
}
