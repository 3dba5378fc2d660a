//! Error types for citerag

use thiserror::Error;

/// Result type alias for citerag operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in citerag operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid chunk size / overlap configuration
    #[error("chunking error: {0}")]
    Chunking(String),

    /// Failed to embed text (bad input or malformed model output)
    #[error("embedding error: {0}")]
    Embedding(String),

    /// An external service could not be reached or timed out
    #[error("{service} unavailable: {reason}")]
    ServiceUnavailable {
        service: &'static str,
        reason: String,
    },

    /// A vector does not have the dimension the index was configured with
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Failed to write to the vector index; the whole batch may be retried
    #[error("index write error: {0}")]
    IndexWrite(String),

    /// Failed to query the vector index
    #[error("index query error: {0}")]
    IndexQuery(String),

    /// The relevance scoring service failed
    #[error("rerank error: {0}")]
    Rerank(String),

    /// The language model call failed
    #[error("generation error: {0}")]
    Generation(String),

    /// Invalid or incomplete configuration
    #[error("config error: {0}")]
    Config(String),

    /// Invalid input provided
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Stable code for translating the error into a user-facing response.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::Chunking(_) => "chunking_error",
            Error::Embedding(_) => "embedding_error",
            Error::ServiceUnavailable { .. } => "service_unavailable",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::IndexWrite(_) => "index_write_error",
            Error::IndexQuery(_) => "index_query_error",
            Error::Rerank(_) => "rerank_error",
            Error::Generation(_) => "generation_error",
            Error::Config(_) => "config_error",
            Error::InvalidInput(_) => "invalid_input",
        }
    }

    /// Returns `true` when the same call may succeed if retried unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ServiceUnavailable { .. } | Error::IndexWrite(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_service() {
        let err = Error::ServiceUnavailable {
            service: "embedding",
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "embedding unavailable: connection refused");
        assert_eq!(err.code(), "service_unavailable");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::IndexWrite("503".to_string()).is_retryable());
        assert!(!Error::DimensionMismatch { expected: 3, actual: 4 }.is_retryable());
        assert!(!Error::InvalidInput("empty".to_string()).is_retryable());
    }
}
