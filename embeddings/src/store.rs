//! The embedding store and its update policy.
//!
//! One record per project id. A new vector only replaces the stored one when
//! it has drifted far enough from it (cosine similarity below the update
//! threshold); near-duplicates are dropped so rewording alone does not churn
//! the store or the neighbor index derived from it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::VectorBackend;
use crate::error::{EmbeddingError, Result};
use crate::similarity::cosine_similarity;
use crate::Embedding;

/// Default similarity at or above which a new vector is considered a restatement.
pub const DEFAULT_UPDATE_THRESHOLD: f32 = 0.95;

/// The stored context and vector for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Project identifier.
    pub project_id: String,

    /// The text the vector was computed from.
    pub context_text: String,

    /// The embedding vector.
    pub vector: Embedding,

    /// Model that produced the vector.
    pub model: String,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        project_id: impl Into<String>,
        context_text: impl Into<String>,
        vector: Embedding,
        model: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            context_text: context_text.into(),
            vector,
            model: model.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Store-wide facts every record must agree with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Model key the vectors were produced with.
    pub model: String,

    /// Dimension shared by all vectors.
    pub dimension: usize,
}

impl StoreMetadata {
    /// Create metadata for a model and dimension.
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
        }
    }
}

/// What `put_or_update` did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteOutcome {
    /// No record existed; the new one was written.
    Inserted,

    /// The stored record drifted and was replaced.
    Updated { similarity: f32 },

    /// The new vector restates the stored one; nothing was written.
    Unchanged { similarity: f32 },

    /// There was no vector to store; nothing was written.
    NoContent,
}

impl WriteOutcome {
    /// Whether the backend was written.
    pub fn wrote(&self) -> bool {
        matches!(self, WriteOutcome::Inserted | WriteOutcome::Updated { .. })
    }
}

/// Embedding store with a drift-based update policy.
///
/// Writes for the same project id are serialized; writes for different ids
/// run concurrently.
pub struct EmbeddingStore {
    /// Persistence.
    backend: Arc<dyn VectorBackend>,

    /// Model key new records are stamped with.
    model: String,

    /// Similarity below which a stored record is replaced.
    threshold: f32,

    /// Dimension fixed by the first accepted vector.
    dimension: RwLock<Option<usize>>,

    /// One lock per project id.
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EmbeddingStore {
    /// Open a store over `backend` for vectors produced by `model`.
    ///
    /// Fails with [`EmbeddingError::ModelMismatch`] if the backend holds
    /// vectors from another model.
    pub async fn open(backend: Arc<dyn VectorBackend>, model: impl Into<String>) -> Result<Self> {
        let model = model.into();

        let dimension = match backend.load_metadata().await? {
            Some(metadata) => {
                if metadata.model != model {
                    return Err(EmbeddingError::ModelMismatch {
                        stored: metadata.model,
                        provided: model,
                    });
                }
                Some(metadata.dimension)
            }
            None => Self::infer_dimension(backend.as_ref()).await?,
        };

        info!(
            "Opened embedding store (model: {model}, dimension: {})",
            dimension.map_or_else(|| "unset".to_string(), |d| d.to_string())
        );

        Ok(Self {
            backend,
            model,
            threshold: DEFAULT_UPDATE_THRESHOLD,
            dimension: RwLock::new(dimension),
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Set the update threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Records written without metadata must still agree on one dimension.
    async fn infer_dimension(backend: &dyn VectorBackend) -> Result<Option<usize>> {
        let records = backend.list_all().await?;
        let mut dimension = None;
        for record in &records {
            match dimension {
                None => dimension = Some(record.vector.len()),
                Some(expected) if expected != record.vector.len() => {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected,
                        actual: record.vector.len(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(dimension)
    }

    /// The update threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// The model key records are stamped with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The established vector dimension, if any vector has been accepted.
    pub async fn dimension(&self) -> Option<usize> {
        *self.dimension.read().await
    }

    /// Store-wide metadata, once a dimension is established.
    pub async fn metadata(&self) -> Option<StoreMetadata> {
        self.dimension()
            .await
            .map(|dimension| StoreMetadata::new(self.model.clone(), dimension))
    }

    /// Get the record for a project.
    pub async fn get(&self, project_id: &str) -> Result<Option<EmbeddingRecord>> {
        self.backend.get(project_id).await
    }

    /// Number of stored records.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.backend.list_all().await?.len())
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// All `(project_id, vector)` pairs, ordered by project id.
    pub async fn snapshot(&self) -> Result<Vec<(String, Embedding)>> {
        let mut pairs: Vec<(String, Embedding)> = self
            .backend
            .list_all()
            .await?
            .into_iter()
            .map(|record| (record.project_id, record.vector))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pairs)
    }

    async fn key_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks.entry(project_id.to_string()).or_default().clone()
    }

    /// Drop the lock entry for `project_id` unless another writer holds a
    /// clone of it.
    async fn release_key_lock(&self, project_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.key_locks.lock().await;
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(project_id);
        }
    }

    /// Reject vectors that would poison the store or every distance computed
    /// from it.
    fn check_values(project_id: &str, vector: &[f32]) -> Result<()> {
        let reason = if vector.is_empty() {
            "empty vector".to_string()
        } else if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
            format!("non-finite value {} at position {position}", vector[position])
        } else {
            return Ok(());
        };
        Err(EmbeddingError::InvalidVector {
            project_id: project_id.to_string(),
            reason,
        })
    }

    /// Accept `actual` as the store dimension, or reject it.
    async fn check_dimension(&self, project_id: &str, actual: usize) -> Result<()> {
        let mut dimension = self.dimension.write().await;
        match *dimension {
            Some(expected) if expected != actual => {
                warn!(
                    "Rejected vector for {project_id}: dimension {actual}, store uses {expected}"
                );
                Err(EmbeddingError::DimensionMismatch { expected, actual })
            }
            Some(_) => Ok(()),
            None => {
                self.backend
                    .save_metadata(StoreMetadata::new(self.model.clone(), actual))
                    .await?;
                *dimension = Some(actual);
                debug!("Established store dimension {actual}");
                Ok(())
            }
        }
    }

    /// Write, replace or keep the record for `project_id`.
    ///
    /// - no vector: nothing happens, an existing record is never erased
    /// - empty or non-finite vector: rejected, nothing is written
    /// - no stored record: the new pair is inserted
    /// - similarity to the stored vector below the threshold: the stored
    ///   context and vector are replaced together
    /// - otherwise: nothing happens
    pub async fn put_or_update(
        &self,
        project_id: &str,
        context: &str,
        vector: Option<Embedding>,
    ) -> Result<WriteOutcome> {
        let Some(vector) = vector else {
            debug!("No embeddable content for {project_id}, leaving store untouched");
            return Ok(WriteOutcome::NoContent);
        };
        Self::check_values(project_id, &vector)?;

        let lock = self.key_lock(project_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.write_locked(project_id, context, vector).await
        };
        self.release_key_lock(project_id, lock).await;
        outcome
    }

    async fn write_locked(
        &self,
        project_id: &str,
        context: &str,
        vector: Embedding,
    ) -> Result<WriteOutcome> {
        self.check_dimension(project_id, vector.len()).await?;

        let Some(existing) = self.backend.get(project_id).await? else {
            self.backend
                .put(EmbeddingRecord::new(project_id, context, vector, &self.model))
                .await?;
            debug!("Inserted embedding for {project_id}");
            return Ok(WriteOutcome::Inserted);
        };

        let similarity = cosine_similarity(&existing.vector, &vector)?;
        if similarity < self.threshold {
            self.backend
                .put(EmbeddingRecord::new(project_id, context, vector, &self.model))
                .await?;
            debug!(
                "Updated embedding for {project_id} (similarity {similarity:.4} < {:.4})",
                self.threshold
            );
            Ok(WriteOutcome::Updated { similarity })
        } else {
            debug!(
                "Kept embedding for {project_id} (similarity {similarity:.4} >= {:.4})",
                self.threshold
            );
            Ok(WriteOutcome::Unchanged { similarity })
        }
    }
}
