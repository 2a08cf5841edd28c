//! Configuration for a refresh run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use projsim_embeddings::{DEFAULT_UPDATE_THRESHOLD, DistanceMetric, SimilarityIndexBuilder, TieBreak};

use crate::error::{PipelineError, Result};

/// Configuration for a refresh run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where embeddings are kept.
    pub store: StoreConfig,

    /// Update policy.
    pub update: UpdateConfig,

    /// Neighbor index shape.
    pub index: IndexConfig,

    /// Embedding gateway.
    pub gateway: GatewayConfig,
}

impl PipelineConfig {
    /// Parse a TOML document. Missing sections take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub async fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.update.threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(PipelineError::Config(format!(
                "update.threshold must be in (0, 1], got {threshold}"
            )));
        }
        if self.index.k == 0 {
            return Err(PipelineError::Config("index.k must be at least 1".to_string()));
        }
        if self.gateway.max_concurrency == 0 {
            return Err(PipelineError::Config(
                "gateway.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.gateway.timeout_secs == 0 {
            return Err(PipelineError::Config(
                "gateway.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the store file.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store.path = Some(path.into());
        self
    }

    /// Set the update threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.update.threshold = threshold;
        self
    }

    /// Set the number of neighbors per project.
    pub fn with_k(mut self, k: usize) -> Self {
        self.index.k = k;
        self
    }

    /// Set the number of concurrent gateway calls.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.gateway.max_concurrency = max_concurrency;
        self
    }

    /// Set the per-call gateway timeout.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.gateway.timeout_secs = timeout_secs;
        self
    }
}

/// Where embeddings are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON store file. In-memory when unset.
    pub path: Option<PathBuf>,
}

/// Update policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Similarity below which a stored vector is replaced.
    pub threshold: f32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_UPDATE_THRESHOLD,
        }
    }
}

/// Neighbor index shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum neighbors per project.
    pub k: usize,

    /// Distance used for ranking.
    pub metric: DistanceMetric,

    /// Order at equal distance.
    pub tie_break: TieBreak,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            k: 10,
            metric: DistanceMetric::Cosine,
            tie_break: TieBreak::IdAscending,
        }
    }
}

impl IndexConfig {
    /// Builder configured from these settings.
    pub fn builder(&self) -> SimilarityIndexBuilder {
        SimilarityIndexBuilder::new(self.k)
            .with_metric(self.metric)
            .with_tie_break(self.tie_break)
    }
}

/// Embedding gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Model name; the provider default when unset.
    pub model: Option<String>,

    /// API base URL; the provider default when unset.
    pub base_url: Option<String>,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Per-call timeout.
    pub timeout_secs: u64,

    /// Maximum concurrent gateway calls.
    pub max_concurrency: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: None,
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_concurrency: 4,
        }
    }
}

impl GatewayConfig {
    /// Per-call timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.update.threshold, DEFAULT_UPDATE_THRESHOLD);
        assert_eq!(config.index.k, 10);
        assert_eq!(config.index.tie_break, TieBreak::IdAscending);
        assert_eq!(config.gateway.timeout(), Duration::from_secs(30));
        assert!(config.store.path.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [update]
            threshold = 0.9

            [index]
            k = 5
            metric = "euclidean"
            tie_break = "id_descending"
            "#,
        )
        .unwrap();

        assert_eq!(config.update.threshold, 0.9);
        assert_eq!(config.index.k, 5);
        assert_eq!(config.index.metric, DistanceMetric::Euclidean);
        assert_eq!(config.index.tie_break, TieBreak::IdDescending);
        assert_eq!(config.gateway.max_concurrency, 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PipelineConfig::default().with_k(0).validate().is_err());
        assert!(PipelineConfig::default().with_threshold(0.0).validate().is_err());
        assert!(PipelineConfig::default().with_threshold(1.5).validate().is_err());
        assert!(
            PipelineConfig::default()
                .with_max_concurrency(0)
                .validate()
                .is_err()
        );
        assert!(PipelineConfig::from_toml_str("[index]\nk = 0\n").is_err());
    }

    #[tokio::test]
    async fn test_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("projsim.toml");
        tokio::fs::write(&path, "[store]\npath = \"embeddings.json\"\n")
            .await
            .unwrap();

        let config = PipelineConfig::from_toml_file(&path).await.unwrap();
        assert_eq!(config.store.path, Some(PathBuf::from("embeddings.json")));
    }
}
