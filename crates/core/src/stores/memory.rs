use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{PipelineError, Result};
use crate::models::{DistanceMetric, IndexEntry, ScoredChunk};
use crate::traits::VectorIndex;

const SNAPSHOT_VERSION: u32 = 1;

/// In-memory nearest-neighbor index. Reads share the lock; each `add`
/// batch holds the write half, so queries never observe a partial
/// batch. The metric is fixed for the lifetime of the index.
pub struct MemoryVectorIndex {
    metric: DistanceMetric,
    state: RwLock<IndexState>,
}

#[derive(Default)]
struct IndexState {
    dimensions: Option<usize>,
    entries: Vec<IndexEntry>,
}

impl MemoryVectorIndex {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Width of the stored vectors; `None` until the first insert.
    pub async fn dimensions(&self) -> Option<usize> {
        self.state.read().await.dimensions
    }

    /// Writes the index to a versioned JSON file: metric, dimensions,
    /// and one record per entry with the chunk's provenance and vector
    /// values, enough to reload without re-embedding.
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let state = self.state.read().await;
            Snapshot {
                version: SNAPSHOT_VERSION,
                metric: self.metric,
                dimensions: state.dimensions,
                created_at: Utc::now(),
                entries: state.entries.clone(),
            }
        };

        let data = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    pub async fn load_snapshot(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&data)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PipelineError::Snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        // reinsert through `add` so width checks still apply
        let index = Self::new(snapshot.metric);
        if !snapshot.entries.is_empty() {
            index.add(snapshot.entries).await?;
        }
        Ok(index)
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    metric: DistanceMetric,
    dimensions: Option<usize>,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        let expected = state.dimensions.unwrap_or(entries[0].vector.len());
        for entry in &entries {
            if entry.vector.len() != expected {
                return Err(PipelineError::DimensionMismatch {
                    expected,
                    actual: entry.vector.len(),
                });
            }
        }

        state.dimensions = Some(expected);
        state.entries.extend(entries);
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "k must be positive".to_string(),
            ));
        }

        let state = self.state.read().await;
        let Some(expected) = state.dimensions else {
            return Ok(Vec::new());
        };
        if vector.len() != expected {
            return Err(PipelineError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<ScoredChunk> = state
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: distance(self.metric, vector, &entry.vector),
            })
            .collect();

        scored.sort_by(|left, right| {
            left.score
                .total_cmp(&right.score)
                .then_with(|| left.chunk.sequence_index.cmp(&right.chunk.sequence_index))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

fn distance(metric: DistanceMetric, left: &[f32], right: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Euclidean => euclidean_distance(left, right),
        DistanceMetric::Cosine => 1.0 - cosine_similarity(left, right),
    }
}

fn euclidean_distance(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt()
}

/// Zero-magnitude vectors have similarity 0, which makes them maximally
/// distant under the cosine metric.
fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    let norm_left = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_right = right.iter().map(|v| v * v).sum::<f32>().sqrt();

    if norm_left == 0.0 || norm_right == 0.0 {
        0.0
    } else {
        dot / (norm_left * norm_right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use tempfile::tempdir;

    fn entry(sequence_index: u64, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                chunk_id: format!("chunk-{sequence_index}"),
                document_id: "doc".to_string(),
                page_index: 0,
                start_offset: 0,
                end_offset: 4,
                sequence_index,
                text: format!("text {sequence_index}"),
            },
            vector,
        }
    }

    #[tokio::test]
    async fn query_orders_by_ascending_distance() {
        let index = MemoryVectorIndex::new(DistanceMetric::Euclidean);
        index
            .add(vec![
                entry(0, vec![10.0, 0.0]),
                entry(1, vec![1.0, 0.0]),
                entry(2, vec![4.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[0.0, 0.0], 3).await.unwrap();
        let order: Vec<u64> = hits.iter().map(|hit| hit.chunk.sequence_index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!(hits[0].score <= hits[1].score && hits[1].score <= hits[2].score);
    }

    #[tokio::test]
    async fn ties_break_on_sequence_index() {
        let index = MemoryVectorIndex::new(DistanceMetric::Euclidean);
        index
            .add(vec![
                entry(5, vec![1.0, 0.0]),
                entry(2, vec![1.0, 0.0]),
                entry(9, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[0.0, 0.0], 3).await.unwrap();
        let order: Vec<u64> = hits.iter().map(|hit| hit.chunk.sequence_index).collect();
        assert_eq!(order, vec![2, 5, 9]);
    }

    #[tokio::test]
    async fn query_returns_min_of_k_and_entry_count() {
        let index = MemoryVectorIndex::new(DistanceMetric::Euclidean);
        index
            .add(vec![entry(0, vec![1.0]), entry(1, vec![2.0])])
            .await
            .unwrap();

        assert_eq!(index.query(&[0.0], 10).await.unwrap().len(), 2);
        assert_eq!(index.query(&[0.0], 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_k_is_rejected() {
        let index = MemoryVectorIndex::new(DistanceMetric::Euclidean);
        assert!(matches!(
            index.query(&[0.0], 0).await,
            Err(PipelineError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let index = MemoryVectorIndex::new(DistanceMetric::Euclidean);
        assert!(index.query(&[1.0, 2.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_add_is_rejected_whole() {
        let index = MemoryVectorIndex::new(DistanceMetric::Euclidean);
        let result = index
            .add(vec![entry(0, vec![1.0, 2.0]), entry(1, vec![1.0])])
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert_eq!(index.len().await, 0);
    }

    #[tokio::test]
    async fn mismatched_query_vector_is_rejected() {
        let index = MemoryVectorIndex::new(DistanceMetric::Euclidean);
        index.add(vec![entry(0, vec![1.0, 2.0])]).await.unwrap();

        assert!(matches!(
            index.query(&[1.0], 1).await,
            Err(PipelineError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn exact_match_has_zero_distance() {
        let index = MemoryVectorIndex::new(DistanceMetric::Euclidean);
        index
            .add(vec![entry(0, vec![0.6, 0.8]), entry(1, vec![-0.8, 0.6])])
            .await
            .unwrap();

        let hits = index.query(&[0.6, 0.8], 1).await.unwrap();
        assert_eq!(hits[0].chunk.sequence_index, 0);
        assert!(hits[0].score.abs() < 1e-6);
    }

    #[tokio::test]
    async fn cosine_metric_ranks_by_angle() {
        let index = MemoryVectorIndex::new(DistanceMetric::Cosine);
        index
            .add(vec![
                entry(0, vec![0.0, 1.0]),
                entry(1, vec![5.0, 0.0]),
            ])
            .await
            .unwrap();

        // scale does not matter under cosine
        let hits = index.query(&[0.1, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].chunk.sequence_index, 1);
        assert!(hits[0].score.abs() < 1e-6);
        assert!((hits[1].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn snapshot_round_trips() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index.json");

        let index = MemoryVectorIndex::new(DistanceMetric::Cosine);
        index
            .add(vec![entry(0, vec![1.0, 0.0]), entry(1, vec![0.0, 1.0])])
            .await?;
        index.save_snapshot(&path).await?;

        let restored = MemoryVectorIndex::load_snapshot(&path).await?;
        assert_eq!(restored.metric(), DistanceMetric::Cosine);
        assert_eq!(restored.len().await, 2);
        assert_eq!(restored.dimensions().await, Some(2));

        let hits = restored.query(&[1.0, 0.0], 1).await?;
        assert_eq!(hits[0].chunk.sequence_index, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_snapshot_version_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index.json");

        let snapshot = Snapshot {
            version: 99,
            metric: DistanceMetric::Euclidean,
            dimensions: None,
            created_at: Utc::now(),
            entries: Vec::new(),
        };
        tokio::fs::write(&path, serde_json::to_vec(&snapshot)?).await?;

        let result = MemoryVectorIndex::load_snapshot(&path).await;
        assert!(matches!(result, Err(PipelineError::Snapshot(_))));
        Ok(())
    }
}
