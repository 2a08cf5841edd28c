//! # Embeddings
//!
//! This crate keeps one semantic vector per project and derives a
//! "similar projects" index from the stored vectors.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to dense vectors through a provider
//! - **Incremental Store**: Write, replace or keep a project's vector based on drift
//! - **Neighbor Index**: Rank every project's top-k most similar projects
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► put_or_update ──► EmbeddingStore         │
//! │       │                                      │                  │
//! │       ▼                                      ▼                  │
//! │  OpenAI/Timeout          VectorBackend   snapshot ──► Index     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod error;
pub mod index;
pub mod provider;
pub mod similarity;
pub mod store;

pub use backend::{JsonFileBackend, MemoryBackend, VectorBackend};
pub use error::{EmbeddingError, Result};
pub use index::{
    DistanceMatrix, DistanceMetric, Neighbor, NeighborEntry, SimilarityIndexBuilder, TieBreak,
};
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, ModelIdentity, OpenAIProvider,
    TimeoutProvider,
};
pub use similarity::{cosine_distance, cosine_similarity, euclidean_distance};
pub use store::{
    DEFAULT_UPDATE_THRESHOLD, EmbeddingRecord, EmbeddingStore, StoreMetadata, WriteOutcome,
};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
