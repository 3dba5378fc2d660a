use serde::{Deserialize, Serialize};

use crate::config::RerankSettings;
use crate::http::{endpoint, JsonClient};
use crate::rerank::{RelevanceScore, RelevanceScorer};
use crate::{Error, Result};

/// Relevance scoring through the Cohere rerank API.
///
/// Makes a single attempt per call: a slow or failing reranker should fall
/// back quickly rather than hold up the query.
pub struct CohereScorer {
    client: JsonClient,
    endpoint: String,
    model: String,
}

impl CohereScorer {
    pub fn new(settings: &RerankSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("missing Cohere API key".to_string()))?;

        let client = JsonClient::new(
            "rerank",
            &[("authorization", format!("Bearer {api_key}"))],
            settings.timeout,
            1,
        )?;

        Ok(Self {
            client,
            endpoint: endpoint(&settings.base_url, "v1/rerank"),
            model: settings.model.clone(),
        })
    }
}

impl RelevanceScorer for CohereScorer {
    fn name(&self) -> &str {
        &self.model
    }

    fn score(&self, query: &str, documents: &[&str], top_n: usize) -> Result<Vec<RelevanceScore>> {
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n,
        };

        let response: RerankResponse = self
            .client
            .post_json(&self.endpoint, &request)
            .map_err(|e| Error::Rerank(e.to_string()))?;

        Ok(response
            .results
            .into_iter()
            .map(|r| RelevanceScore {
                index: r.index,
                relevance_score: r.relevance_score,
            })
            .collect())
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [&'a str],
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::chunk::ChunkMetadata;
    use crate::rerank::Reranker;
    use crate::store::ScoredDocument;

    fn settings() -> RerankSettings {
        RerankSettings {
            api_key: Some("co-test".to_string()),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(500),
            ..RerankSettings::default()
        }
    }

    #[test]
    fn test_response_parsing() {
        let response: RerankResponse = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "results": [
                {"index": 2, "relevance_score": 0.98},
                {"index": 0, "relevance_score": 0.12}
            ],
            "meta": {"api_version": {"version": "1"}}
        }))
        .unwrap();

        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].index, 2);
    }

    #[test]
    fn test_unreachable_service_is_rerank_error() {
        let scorer = CohereScorer::new(&settings()).unwrap();
        let err = scorer.score("q", &["a", "b"], 2).unwrap_err();
        assert!(matches!(err, Error::Rerank(_)));
    }

    #[test]
    fn test_unreachable_service_degrades() {
        let reranker = Reranker::new(Box::new(CohereScorer::new(&settings()).unwrap()));
        let docs: Vec<ScoredDocument> = (0..4)
            .map(|i| ScoredDocument {
                id: format!("doc_{i}"),
                score: 1.0 - i as f32 * 0.1,
                metadata: ChunkMetadata {
                    content: Some(format!("passage {i}")),
                    ..ChunkMetadata::default()
                },
            })
            .collect();

        let results = reranker.rerank("q", &docs, 3);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].document.id, "doc_0");
        assert!(results.iter().all(|r| r.rerank_score.is_none()));
    }
}
