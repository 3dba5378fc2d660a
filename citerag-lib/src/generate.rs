//! Grounded answer generation
//!
//! The system instruction and [`REFUSAL`] are a content contract: callers
//! may detect "no answer" by exact match on the refusal sentence.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GenerationSettings;
use crate::http::{endpoint, JsonClient};
use crate::{Error, Result};

/// Sentence the model is told to emit when the context has no answer.
pub const REFUSAL: &str = "I cannot find this information in the provided documents.";

/// System instruction constraining the model to the supplied context.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions ONLY based on the provided context.
Do NOT use any external knowledge or information not in the context.
Do NOT make up citations.
If the answer is not in the context, say: \"I cannot find this information in the provided documents.\"
Always cite sources using [1], [2], etc. that correspond to the numbered context items.";

/// Trait for answer generators
pub trait Generator: Send + Sync {
    /// Answer `query` using only `context`.
    fn generate(&self, query: &str, context: &str) -> Result<String>;

    /// Returns the model name/identifier
    fn model_name(&self) -> &str;
}

/// Returns `true` if `answer` is the refusal sentence.
#[must_use]
pub fn is_refusal(answer: &str) -> bool {
    answer.trim() == REFUSAL
}

/// User turn combining the numbered context and the question.
#[must_use]
pub fn user_prompt(query: &str, context: &str) -> String {
    format!(
        "Context:\n{context}\n\nQuestion: {query}\n\nAnswer using ONLY the provided context. Do not add external knowledge."
    )
}

/// Construct the generator described by `settings`.
pub fn from_settings(settings: &GenerationSettings) -> Result<Arc<dyn Generator>> {
    Ok(Arc::new(ChatGenerator::new(settings)?))
}

/// Generator backed by an OpenAI-compatible chat completions API
/// (Groq by default).
///
/// One attempt per call; a failure surfaces as [`Error::Generation`].
pub struct ChatGenerator {
    client: JsonClient,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl ChatGenerator {
    pub fn new(settings: &GenerationSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("missing generation API key".to_string()))?;

        let client = JsonClient::new(
            "generation",
            &[("authorization", format!("Bearer {api_key}"))],
            settings.timeout,
            1,
        )?;

        Ok(Self {
            client,
            endpoint: endpoint(&settings.base_url, "chat/completions"),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

impl Generator for ChatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn generate(&self, query: &str, context: &str) -> Result<String> {
        let prompt = user_prompt(query, context);
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };

        let response: ChatResponse = self
            .client
            .post_json(&self.endpoint, &request)
            .map_err(|e| Error::Generation(e.to_string()))?;

        let answer = first_answer(response)?;
        debug!(model = %self.model, chars = answer.len(), "generated answer");
        Ok(answer)
    }
}

fn first_answer(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| Error::Generation("response missing answer text".to_string()))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_system_prompt_contains_refusal() {
        assert!(SYSTEM_PROMPT.contains(REFUSAL));
    }

    #[test]
    fn test_is_refusal_exact() {
        assert!(is_refusal(REFUSAL));
        assert!(is_refusal(&format!("  {REFUSAL}\n")));
        assert!(!is_refusal("Refunds take five days [1]."));
    }

    #[test]
    fn test_user_prompt_layout() {
        let prompt = user_prompt("How long do refunds take?", "[1] Refunds:\nFive days.\n");
        assert!(prompt.starts_with("Context:\n[1] Refunds:\nFive days.\n"));
        assert!(prompt.contains("Question: How long do refunds take?"));
    }

    #[test]
    fn test_first_answer() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Five days [1]."}}]
        }))
        .unwrap();
        assert_eq!(first_answer(response).unwrap(), "Five days [1].");

        let empty: ChatResponse = serde_json::from_value(serde_json::json!({"choices": []})).unwrap();
        assert!(matches!(first_answer(empty), Err(Error::Generation(_))));
    }

    #[test]
    fn test_requires_api_key() {
        let settings = GenerationSettings::default();
        assert!(matches!(ChatGenerator::new(&settings), Err(Error::Config(_))));
    }

    #[test]
    fn test_unreachable_service_is_generation_error() {
        let settings = GenerationSettings {
            api_key: Some("gsk-test".to_string()),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(500),
            ..GenerationSettings::default()
        };
        let generator = ChatGenerator::new(&settings).unwrap();
        assert!(matches!(
            generator.generate("q", "context"),
            Err(Error::Generation(_))
        ));
    }
}
