//! Per-project neighbor lists built from a snapshot of the store.
//!
//! The index is recomputed from scratch on every run: all pairwise distances
//! are computed once, then each row is ranked independently.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{cosine_distance, euclidean_distance};

/// Distance used to rank neighbors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cosine_similarity`; the reported score is the cosine similarity.
    #[default]
    Cosine,
    /// L2 distance; the reported score is `1 / (1 + distance)`.
    Euclidean,
}

impl DistanceMetric {
    /// Distance between two vectors.
    pub fn distance(self, a: &[f32], b: &[f32]) -> Result<f32> {
        match self {
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::Euclidean => euclidean_distance(a, b),
        }
    }

    /// Similarity score reported for a distance. Higher is closer.
    pub fn score(self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::Euclidean => 1.0 / (1.0 + distance),
        }
    }
}

/// Order of candidates at equal distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Smaller project id first.
    #[default]
    IdAscending,
    /// Larger project id first.
    IdDescending,
}

impl TieBreak {
    fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            TieBreak::IdAscending => a.cmp(b),
            TieBreak::IdDescending => b.cmp(a),
        }
    }
}

/// One ranked neighbor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Neighbor project id.
    pub id: String,

    /// Similarity score, higher is closer.
    pub score: f32,
}

/// Ranked neighbors of one project, closest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborEntry {
    /// Project id.
    pub project_id: String,

    /// At most `k` neighbors, never the project itself.
    pub neighbors: Vec<Neighbor>,
}

impl NeighborEntry {
    /// Neighbor ids in rank order.
    pub fn neighbor_ids(&self) -> Vec<&str> {
        self.neighbors.iter().map(|n| n.id.as_str()).collect()
    }
}

/// Symmetric N×N distance matrix over a fixed ordering of ids.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    ids: Vec<String>,
    values: Vec<f32>,
}

impl DistanceMatrix {
    /// Compute all pairwise distances.
    ///
    /// Only the upper triangle is computed; the lower one is mirrored and
    /// the diagonal is zero.
    pub fn compute(items: &[(String, Embedding)], metric: DistanceMetric) -> Result<Self> {
        let n = items.len();
        let mut values = vec![0.0f32; n * n];

        for i in 0..n {
            for j in (i + 1)..n {
                let d = metric.distance(&items[i].1, &items[j].1)?;
                values[i * n + j] = d;
                values[j * n + i] = d;
            }
        }

        Ok(Self {
            ids: items.iter().map(|(id, _)| id.clone()).collect(),
            values,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row/column ids.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Distance by position.
    pub fn get(&self, i: usize, j: usize) -> Option<f32> {
        let n = self.len();
        if i >= n || j >= n {
            return None;
        }
        Some(self.values[i * n + j])
    }

    /// Distance by id.
    pub fn distance(&self, a: &str, b: &str) -> Option<f32> {
        let i = self.ids.iter().position(|id| id == a)?;
        let j = self.ids.iter().position(|id| id == b)?;
        self.get(i, j)
    }
}

/// Builds top-k neighbor lists for every project in a snapshot.
#[derive(Debug, Clone)]
pub struct SimilarityIndexBuilder {
    /// Maximum neighbors per project.
    k: usize,

    /// Distance function.
    metric: DistanceMetric,

    /// Order at equal distance.
    tie_break: TieBreak,
}

impl SimilarityIndexBuilder {
    /// Create a builder keeping `k` neighbors per project.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            metric: DistanceMetric::default(),
            tie_break: TieBreak::default(),
        }
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Set the tie-break rule.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Neighbors kept per project.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Build one entry per project, in project id order.
    ///
    /// With zero or one project every list is empty; with fewer than `k`
    /// other projects the lists are shorter than `k`, never padded.
    pub fn build(&self, mut items: Vec<(String, Embedding)>) -> Result<Vec<NeighborEntry>> {
        items.sort_by(|a, b| a.0.cmp(&b.0));

        if let Some((_, first)) = items.first() {
            let expected = first.len();
            if let Some((id, bad)) = items.iter().find(|(_, v)| v.len() != expected) {
                debug!("Vector for {id} does not match snapshot dimension {expected}");
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }

        let matrix = DistanceMatrix::compute(&items, self.metric)?;
        let entries = self.rank(&matrix);

        info!(
            "Built neighbor index for {} projects (k = {}, metric = {:?})",
            entries.len(),
            self.k,
            self.metric
        );
        Ok(entries)
    }

    /// Rank every row of a precomputed matrix.
    pub fn rank(&self, matrix: &DistanceMatrix) -> Vec<NeighborEntry> {
        let n = matrix.len();
        let ids = matrix.ids();

        (0..n)
            .map(|i| {
                let mut candidates: Vec<(OrderedFloat<f32>, usize)> = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| (OrderedFloat(matrix.values[i * n + j]), j))
                    .collect();

                candidates.sort_by(|a, b| {
                    a.0.cmp(&b.0)
                        .then_with(|| self.tie_break.compare(&ids[a.1], &ids[b.1]))
                });
                candidates.truncate(self.k);

                NeighborEntry {
                    project_id: ids[i].clone(),
                    neighbors: candidates
                        .into_iter()
                        .map(|(distance, j)| Neighbor {
                            id: ids[j].clone(),
                            score: self.metric.score(distance.0),
                        })
                        .collect(),
                }
            })
            .collect()
    }
}
