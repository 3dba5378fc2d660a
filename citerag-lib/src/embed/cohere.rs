use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmbeddingSettings;
use crate::embed::{check_inputs, check_outputs, EmbedMode, Embedder, Embedding};
use crate::http::{endpoint, HttpFailure, JsonClient};
use crate::{Error, Result};

/// Embeddings client for the Cohere embed API.
///
/// Asymmetric: documents and queries are sent with different `input_type`
/// values. Batches larger than the provider limit are split into consecutive
/// requests and the results concatenated in input order.
pub struct CohereEmbedder {
    client: JsonClient,
    endpoint: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl CohereEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("missing Cohere API key".to_string()))?;

        let client = JsonClient::new(
            "embedding",
            &[("authorization", format!("Bearer {api_key}"))],
            settings.timeout,
            settings.max_attempts,
        )?;

        Ok(Self {
            client,
            endpoint: endpoint(&settings.base_url, "v1/embed"),
            model: settings.model.clone(),
            dimension: settings.dimension,
            batch_size: settings.batch_size.max(1),
        })
    }

    fn embed_request(&self, texts: &[&str], mode: EmbedMode) -> Result<Vec<Embedding>> {
        let request = EmbedRequest {
            model: &self.model,
            texts,
            input_type: match mode {
                EmbedMode::Document => "search_document",
                EmbedMode::Query => "search_query",
            },
            truncate: "END",
        };

        let response: EmbedResponse = self
            .client
            .post_json(&self.endpoint, &request)
            .map_err(into_embedding_error)?;

        Ok(response.embeddings)
    }
}

impl Embedder for CohereEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str], mode: EmbedMode) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        check_inputs(texts)?;

        let embeddings = embed_in_batches(texts, self.batch_size, self.dimension, |batch| {
            self.embed_request(batch, mode)
        })?;

        debug!(model = %self.model, count = texts.len(), ?mode, "embedded batch");
        Ok(embeddings)
    }
}

/// Runs `embed` over consecutive slices of at most `batch_size` texts and
/// concatenates the results in input order. Any slice failing, or returning
/// the wrong number or size of vectors, fails the whole call.
fn embed_in_batches<F>(
    texts: &[&str],
    batch_size: usize,
    dimension: usize,
    mut embed: F,
) -> Result<Vec<Embedding>>
where
    F: FnMut(&[&str]) -> Result<Vec<Embedding>>,
{
    let mut embeddings = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = embed(batch)?;
        check_outputs(&vectors, batch.len(), dimension)?;
        embeddings.extend(vectors);
    }
    Ok(embeddings)
}

fn into_embedding_error(failure: HttpFailure) -> Error {
    if failure.is_unavailable() {
        Error::ServiceUnavailable {
            service: "embedding",
            reason: failure.to_string(),
        }
    } else {
        Error::Embedding(failure.to_string())
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [&'a str],
    input_type: &'a str,
    truncate: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Embedding>,
}
