use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::{PipelineError, Result};
use crate::models::{Chunk, DistanceMetric, IndexEntry, ScoredChunk};
use crate::traits::VectorIndex;

/// Adapter that satisfies [`VectorIndex`] against a Qdrant collection
/// over its HTTP API. The collection must already exist with a vector
/// width of `vector_size` and a metric matching `metric`.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    metric: DistanceMetric,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
            metric,
        }
    }

    fn check_width(&self, actual: usize) -> Result<()> {
        if actual != self.vector_size {
            return Err(PipelineError::DimensionMismatch {
                expected: self.vector_size,
                actual,
            });
        }
        Ok(())
    }

    /// Qdrant reports cosine hits as similarity, higher wins; convert
    /// into this crate's ascending-distance convention.
    fn to_score(&self, raw: f64) -> f32 {
        match self.metric {
            DistanceMetric::Cosine => (1.0 - raw) as f32,
            DistanceMetric::Euclidean => raw.abs() as f32,
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let points = entries
            .iter()
            .map(|entry| {
                self.check_width(entry.vector.len())?;
                let chunk = &entry.chunk;
                Ok(json!({
                    "id": chunk.sequence_index,
                    "vector": entry.vector,
                    "payload": {
                        "chunk_id": chunk.chunk_id,
                        "document_id": chunk.document_id,
                        "page_index": chunk.page_index,
                        "start_offset": chunk.start_offset,
                        "end_offset": chunk.end_offset,
                        "sequence_index": chunk.sequence_index,
                        "text": chunk.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Backend {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "k must be positive".to_string(),
            ));
        }
        self.check_width(vector.len())?;

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Backend {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::new();
        for hit in hits {
            let raw_score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let chunk = chunk_from_payload(hit.pointer("/payload")).ok_or_else(|| {
                PipelineError::Backend {
                    backend: "qdrant".to_string(),
                    details: "search hit payload is missing chunk fields".to_string(),
                }
            })?;
            results.push(ScoredChunk {
                chunk,
                score: self.to_score(raw_score),
            });
        }

        Ok(results)
    }
}

fn chunk_from_payload(payload: Option<&Value>) -> Option<Chunk> {
    let payload = payload?;
    Some(Chunk {
        chunk_id: payload.pointer("/chunk_id")?.as_str()?.to_string(),
        document_id: payload.pointer("/document_id")?.as_str()?.to_string(),
        page_index: payload.pointer("/page_index")?.as_u64()? as usize,
        start_offset: payload.pointer("/start_offset")?.as_u64()? as usize,
        end_offset: payload.pointer("/end_offset")?.as_u64()? as usize,
        sequence_index: payload.pointer("/sequence_index")?.as_u64()?,
        text: payload.pointer("/text")?.as_str()?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_chunk_fields() {
        let payload = json!({
            "chunk_id": "abc",
            "document_id": "doc",
            "page_index": 2,
            "start_offset": 10,
            "end_offset": 90,
            "sequence_index": 7,
            "text": "segment text",
        });

        let chunk = chunk_from_payload(Some(&payload)).unwrap();
        assert_eq!(chunk.chunk_id, "abc");
        assert_eq!(chunk.page_index, 2);
        assert_eq!(chunk.sequence_index, 7);
        assert_eq!(chunk.text, "segment text");
    }

    #[test]
    fn incomplete_payload_is_rejected() {
        let payload = json!({ "chunk_id": "abc" });
        assert!(chunk_from_payload(Some(&payload)).is_none());
        assert!(chunk_from_payload(None).is_none());
    }

    #[test]
    fn cosine_scores_convert_to_distance() {
        let store = QdrantStore::new("http://localhost:6333", "chunks", 4, DistanceMetric::Cosine);
        assert!((store.to_score(1.0)).abs() < 1e-6);
        assert!((store.to_score(0.0) - 1.0).abs() < 1e-6);
    }
}
