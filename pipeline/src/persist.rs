//! Writes the neighbor table.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use projsim_embeddings::NeighborEntry;

use crate::error::Result;

/// One output row: a project and its ranked neighbors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborRow {
    /// Project id.
    pub project_id: String,

    /// Neighbor ids, closest first.
    pub neighbor_ids: Vec<String>,

    /// Scores aligned with `neighbor_ids`.
    pub scores: Vec<f32>,
}

impl From<NeighborEntry> for NeighborRow {
    fn from(entry: NeighborEntry) -> Self {
        let (neighbor_ids, scores): (Vec<String>, Vec<f32>) = entry
            .neighbors
            .into_iter()
            .map(|n| (n.id, n.score))
            .unzip();
        Self {
            project_id: entry.project_id,
            neighbor_ids,
            scores,
        }
    }
}

/// Shape neighbor entries into output rows, one per project.
pub fn to_rows(entries: Vec<NeighborEntry>) -> Vec<NeighborRow> {
    entries.into_iter().map(NeighborRow::from).collect()
}

/// Destination for the neighbor table. Receives the whole table at once.
#[async_trait]
pub trait IndexPersister: Send + Sync {
    /// Persist every row.
    async fn persist(&self, rows: &[NeighborRow]) -> Result<()>;
}

/// Writes one JSON object per line to a file.
pub struct JsonLinesPersister {
    path: PathBuf,
}

impl JsonLinesPersister {
    /// Create a persister writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Output file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IndexPersister for JsonLinesPersister {
    async fn persist(&self, rows: &[NeighborRow]) -> Result<()> {
        let mut content = String::new();
        for row in rows {
            content.push_str(&serde_json::to_string(row)?);
            content.push('\n');
        }

        // Replace the previous table in one step.
        let temp_path = self.path.with_extension("jsonl.tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &self.path).await?;

        info!("Wrote {} neighbor rows to {}", rows.len(), self.path.display());
        Ok(())
    }
}

/// Keeps the last persisted table in memory.
#[derive(Default)]
pub struct MemoryPersister {
    rows: Mutex<Vec<NeighborRow>>,
}

impl MemoryPersister {
    /// Create an empty persister.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last persisted table.
    pub async fn rows(&self) -> Vec<NeighborRow> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl IndexPersister for MemoryPersister {
    async fn persist(&self, rows: &[NeighborRow]) -> Result<()> {
        *self.rows.lock().await = rows.to_vec();
        Ok(())
    }
}
