//! # Refresh Pipeline
//!
//! Keeps the project embedding store current and rebuilds the
//! "similar projects" table from it:
//!
//! - **Records**: resolve raw input rows into project records
//! - **Combiner**: fold a project's rows into one context text
//! - **Engine**: encode, apply the update policy, rebuild the index
//! - **Persist**: write the neighbor table in one batch
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Refresh Run                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ProjectTable ──► TextCombiner ──► EmbeddingProvider            │
//! │                                          │                      │
//! │                                          ▼                      │
//! │                              EmbeddingStore::put_or_update      │
//! │                                          │  (all writes settle) │
//! │                                          ▼                      │
//! │          IndexPersister ◄── SimilarityIndexBuilder ◄── snapshot │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use projsim_pipeline::{JsonLinesPersister, PipelineConfig, ProjectTable, RunContext};
//!
//! let config = PipelineConfig::from_toml_file("projsim.toml").await?;
//! let table = ProjectTable::from_json_lines(std::io::BufReader::new(file))?;
//! let persister = Arc::new(JsonLinesPersister::new("neighbors.jsonl"));
//!
//! let report = RunContext::from_config(config, table, persister).await?.run().await?;
//! ```

pub mod combiner;
pub mod config;
pub mod engine;
pub mod error;
pub mod persist;
pub mod records;

pub use combiner::{ProjectContext, TextCombiner};
pub use config::PipelineConfig;
pub use engine::{RunContext, RunReport, open_store};
pub use error::{PipelineError, Result};
pub use persist::{IndexPersister, JsonLinesPersister, MemoryPersister, NeighborRow};
pub use records::{ProjectRecord, ProjectTable};

// Re-export from dependencies for convenience
pub use projsim_embeddings::{EmbeddingProvider, EmbeddingStore, NeighborEntry};
