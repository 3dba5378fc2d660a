use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunk::ChunkMetadata;
use crate::config::IndexSettings;
use crate::http::{endpoint, JsonClient};
use crate::store::{check_dimensions, EmbeddedChunk, ScoredDocument, VectorIndex};
use crate::{Error, Result};

/// Pinecone limits upsert requests to 100 vectors.
const UPSERT_BATCH: usize = 100;
const API_VERSION: &str = "2024-07";

/// Managed approximate nearest neighbour index on Pinecone's data plane.
///
/// Writes are eventually consistent within Pinecone's SLA: a query issued
/// right after an upsert may not see it yet. Upserts are split into requests
/// of at most 100 vectors; if any request fails the call fails and the whole
/// batch may be retried, since upsert overwrites by id.
pub struct PineconeIndex {
    client: JsonClient,
    upsert_url: String,
    query_url: String,
    namespace: Option<String>,
    dimension: usize,
}

impl PineconeIndex {
    pub fn new(settings: &IndexSettings, dimension: usize) -> Result<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("missing Pinecone API key".to_string()))?;
        let host = settings
            .host
            .as_deref()
            .filter(|h| h.starts_with("http://") || h.starts_with("https://"))
            .ok_or_else(|| Error::Config("Pinecone host must be an http(s) URL".to_string()))?;

        let client = JsonClient::new(
            "pinecone",
            &[
                ("api-key", api_key.to_string()),
                ("x-pinecone-api-version", API_VERSION.to_string()),
            ],
            settings.timeout,
            settings.max_attempts,
        )?;

        Ok(Self {
            client,
            upsert_url: endpoint(host, "vectors/upsert"),
            query_url: endpoint(host, "query"),
            namespace: settings.namespace.clone(),
            dimension,
        })
    }
}

impl VectorIndex for PineconeIndex {
    fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        check_dimensions(chunks, self.dimension)?;

        for batch in chunks.chunks(UPSERT_BATCH) {
            let request = UpsertRequest {
                vectors: batch
                    .iter()
                    .map(|c| UpsertVector {
                        id: &c.chunk.id,
                        values: &c.embedding,
                        metadata: &c.chunk.metadata,
                    })
                    .collect(),
                namespace: self.namespace.as_deref(),
            };

            let response: UpsertResponse = self
                .client
                .post_json(&self.upsert_url, &request)
                .map_err(|e| Error::IndexWrite(e.to_string()))?;

            if response.upserted_count != batch.len() {
                return Err(Error::IndexWrite(format!(
                    "pinecone stored {} of {} vectors",
                    response.upserted_count,
                    batch.len()
                )));
            }
        }

        debug!(upserted = chunks.len(), "pinecone upsert");
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            namespace: self.namespace.as_deref(),
        };

        let response: QueryResponse = self
            .client
            .post_json(&self.query_url, &request)
            .map_err(|e| Error::IndexQuery(e.to_string()))?;

        into_documents(response, top_k)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "pinecone"
    }
}

/// Converts matches into scored documents, refusing matches whose metadata
/// is missing rather than returning them partially filled.
fn into_documents(response: QueryResponse, top_k: usize) -> Result<Vec<ScoredDocument>> {
    let mut documents = response
        .matches
        .into_iter()
        .map(|m| match m.metadata {
            Some(metadata) if metadata.source.is_some() => Ok(ScoredDocument {
                id: m.id,
                score: m.score,
                metadata,
            }),
            _ => Err(Error::IndexQuery(format!("match {} has no metadata", m.id))),
        })
        .collect::<Result<Vec<_>>>()?;

    documents.sort_by(|a, b| b.score.total_cmp(&a.score));
    documents.truncate(top_k);
    Ok(documents)
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a ChunkMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Debug, Deserialize)]
struct Match {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<ChunkMetadata>,
}
