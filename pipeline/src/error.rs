//! Error types for the refresh pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while running the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Embedding, store or index error.
    #[error("embedding error: {0}")]
    Embedding(#[from] projsim_embeddings::EmbeddingError),

    /// An input row resolves to no identifier.
    #[error("row {row} has neither a project_id nor a generated_id")]
    MissingIdentifier { row: usize },

    /// An input row is not a record.
    #[error("row {row} is not an object")]
    MalformedRow { row: usize },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Vectors were rejected because they disagree with the store.
    #[error("store integrity violated for {} project(s): {}", .0.len(), .0.join("; "))]
    Integrity(Vec<String>),

    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The worker pool was shut down.
    #[error("worker pool closed")]
    PoolClosed(#[from] tokio::sync::AcquireError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration parse error.
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
