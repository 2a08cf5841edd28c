//! Key-value backends for the embedding store.
//!
//! A backend only knows how to get, put and list records. The update policy
//! lives in [`crate::store::EmbeddingStore`].

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{EmbeddingError, Result};
use crate::store::{EmbeddingRecord, StoreMetadata};

/// Persistence for embedding records keyed by project id.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Fetch the record stored for a project.
    async fn get(&self, project_id: &str) -> Result<Option<EmbeddingRecord>>;

    /// Insert or replace the record for `record.project_id`.
    async fn put(&self, record: EmbeddingRecord) -> Result<()>;

    /// All stored records.
    async fn list_all(&self) -> Result<Vec<EmbeddingRecord>>;

    /// Model and dimension the stored vectors were produced with.
    async fn load_metadata(&self) -> Result<Option<StoreMetadata>>;

    /// Record the model and dimension of the stored vectors.
    async fn save_metadata(&self, metadata: StoreMetadata) -> Result<()>;
}

/// In-memory backend. Nothing survives the process.
#[derive(Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, EmbeddingRecord>>,
    metadata: RwLock<Option<StoreMetadata>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn get(&self, project_id: &str) -> Result<Option<EmbeddingRecord>> {
        Ok(self.records.read().await.get(project_id).cloned())
    }

    async fn put(&self, record: EmbeddingRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.project_id.clone(), record);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<EmbeddingRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn load_metadata(&self) -> Result<Option<StoreMetadata>> {
        Ok(self.metadata.read().await.clone())
    }

    async fn save_metadata(&self, metadata: StoreMetadata) -> Result<()> {
        *self.metadata.write().await = Some(metadata);
        Ok(())
    }
}

/// On-disk layout of a [`JsonFileBackend`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    metadata: Option<StoreMetadata>,
    records: BTreeMap<String, EmbeddingRecord>,
}

/// Backend persisted as a single JSON document.
///
/// The whole document is loaded on open and rewritten through a temp file
/// and a rename on every change, so a crash never leaves a half-written
/// record behind. Memory only takes the new document once it is on disk.
pub struct JsonFileBackend {
    path: PathBuf,
    state: RwLock<StoreFile>,
}

impl JsonFileBackend {
    /// Open the backend at `path`, loading existing records if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            let file: StoreFile = serde_json::from_str(&content)?;
            info!(
                "Loaded {} embedding records from {}",
                file.records.len(),
                path.display()
            );
            file
        } else {
            StoreFile::default()
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, state: &StoreFile) -> Result<()> {
        let content = serde_json::to_string(state)?;

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &content).await.map_err(|e| {
            EmbeddingError::Storage(format!("{}: {e}", temp_path.display()))
        })?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| EmbeddingError::Storage(format!("{}: {e}", self.path.display())))?;

        debug!(
            "Saved {} embedding records to {}",
            state.records.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for JsonFileBackend {
    async fn get(&self, project_id: &str) -> Result<Option<EmbeddingRecord>> {
        Ok(self.state.read().await.records.get(project_id).cloned())
    }

    async fn put(&self, record: EmbeddingRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.records.insert(record.project_id.clone(), record);
        self.save(&next).await?;
        *state = next;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<EmbeddingRecord>> {
        Ok(self.state.read().await.records.values().cloned().collect())
    }

    async fn load_metadata(&self) -> Result<Option<StoreMetadata>> {
        Ok(self.state.read().await.metadata.clone())
    }

    async fn save_metadata(&self, metadata: StoreMetadata) -> Result<()> {
        let mut state = self.state.write().await;
        let next = StoreFile {
            metadata: Some(metadata),
            records: state.records.clone(),
        };
        self.save(&next).await?;
        *state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(id: &str, text: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord::new(id, text, vector, "test/model")
    }

    #[tokio::test]
    async fn test_memory_backend_put_get() {
        let backend = MemoryBackend::new();
        backend.put(record("P1", "alpha", vec![1.0, 0.0])).await.unwrap();

        let stored = backend.get("P1").await.unwrap().unwrap();
        assert_eq!(stored.context_text, "alpha");
        assert!(backend.get("P2").await.unwrap().is_none());
        assert_eq!(backend.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_backend_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store").join("embeddings.json");

        // Write and close
        {
            let backend = JsonFileBackend::open(&path).await.unwrap();
            backend
                .save_metadata(StoreMetadata::new("test/model", 2))
                .await
                .unwrap();
            backend.put(record("P1", "alpha", vec![1.0, 0.0])).await.unwrap();
            backend.put(record("P2", "beta", vec![0.0, 1.0])).await.unwrap();
        }

        // Reopen and verify
        {
            let backend = JsonFileBackend::open(&path).await.unwrap();
            let metadata = backend.load_metadata().await.unwrap().unwrap();
            assert_eq!(metadata.dimension, 2);
            assert_eq!(metadata.model, "test/model");

            let p2 = backend.get("P2").await.unwrap().unwrap();
            assert_eq!(p2.context_text, "beta");
            assert_eq!(p2.vector, vec![0.0, 1.0]);
            assert_eq!(backend.list_all().await.unwrap().len(), 2);
        }

        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_json_backend_replaces_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("embeddings.json");

        let backend = JsonFileBackend::open(&path).await.unwrap();
        backend.put(record("P1", "old", vec![1.0, 0.0])).await.unwrap();
        backend.put(record("P1", "new", vec![0.0, 1.0])).await.unwrap();

        let reopened = JsonFileBackend::open(&path).await.unwrap();
        let p1 = reopened.get("P1").await.unwrap().unwrap();
        assert_eq!(p1.context_text, "new");
        assert_eq!(p1.vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_json_backend_failed_write_leaves_memory_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store").join("embeddings.json");
        let backend = JsonFileBackend::open(&path).await.unwrap();
        backend.put(record("P1", "kept", vec![1.0, 0.0])).await.unwrap();

        // The store directory can no longer be written.
        std::fs::remove_dir_all(temp_dir.path().join("store")).unwrap();
        std::fs::write(temp_dir.path().join("store"), b"not a directory").unwrap();

        assert!(backend.put(record("P1", "lost", vec![0.0, 1.0])).await.is_err());
        assert!(backend.put(record("P2", "lost", vec![0.0, 1.0])).await.is_err());
        assert!(
            backend
                .save_metadata(StoreMetadata::new("test/model", 2))
                .await
                .is_err()
        );

        assert_eq!(backend.get("P1").await.unwrap().unwrap().context_text, "kept");
        assert!(backend.get("P2").await.unwrap().is_none());
        assert!(backend.load_metadata().await.unwrap().is_none());
    }
}
