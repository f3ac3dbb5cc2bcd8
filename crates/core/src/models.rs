use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingConfig;
use crate::error::{PipelineError, Result};

/// A bounded text segment cut from one page of a document. Immutable
/// once produced; `sequence_index` is the chunk's position among all
/// chunks of the document, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub page_index: usize,
    /// Character offset into the normalized page text.
    pub start_offset: usize,
    pub end_offset: usize,
    pub sequence_index: u64,
    pub text: String,
}

/// One chunk paired with its embedding, owned by the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Query hit: a chunk and its distance from the query vector. Lower
/// scores are better under both metrics.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
}

impl FromStr for DistanceMetric {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "cosine" => Ok(Self::Cosine),
            other => Err(PipelineError::InvalidConfiguration(format!(
                "unknown distance metric: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub metric: DistanceMetric,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub request_timeout: Duration,
    pub max_retries: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            top_k: 4,
            metric: DistanceMetric::Euclidean,
            embed_batch_size: 32,
            embed_concurrency: 4,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<()> {
        ChunkingConfig::from(self).validate()?;

        if self.top_k == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "top_k must be positive".to_string(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "embed_batch_size must be positive".to_string(),
            ));
        }
        if self.embed_concurrency == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "embed_concurrency must be positive".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(PipelineError::InvalidConfiguration(
                "request_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_parses_known_names() {
        assert_eq!(
            "euclidean".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::Euclidean
        );
        assert_eq!(
            "Cosine".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::Cosine
        );
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }

    #[test]
    fn default_options_are_valid() {
        assert!(PipelineOptions::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let options = PipelineOptions {
            chunk_size: 100,
            chunk_overlap: 100,
            ..PipelineOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(PipelineError::InvalidConfiguration(_))
        ));
    }
}
