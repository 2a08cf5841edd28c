//! Error types for the embeddings system.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider not configured.
    #[error("embedding provider not configured")]
    ProviderNotConfigured,

    /// Nothing to encode.
    #[error("cannot embed empty text")]
    EmptyInput,

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A vector that cannot be stored or compared (empty, NaN or infinite).
    #[error("invalid vector for {project_id}: {reason}")]
    InvalidVector { project_id: String, reason: String },

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The provider did not answer in time.
    #[error("embedding request timed out after {timeout_ms}ms")]
    GatewayTimeout { timeout_ms: u64 },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The store was built with a different model.
    #[error("model mismatch: store was built with {stored}, provider is {provided}")]
    ModelMismatch { stored: String, provided: String },

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EmbeddingError {
    /// Whether this error threatens the consistency of the whole store
    /// rather than a single project.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            EmbeddingError::DimensionMismatch { .. } | EmbeddingError::ModelMismatch { .. }
        )
    }
}
