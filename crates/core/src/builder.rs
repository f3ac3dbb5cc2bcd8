use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::chunking::{self, ChunkingConfig};
use crate::document::Document;
use crate::embeddings::Embedder;
use crate::error::{PipelineError, Result};
use crate::models::{Chunk, IndexEntry, PipelineOptions};
use crate::stores::MemoryVectorIndex;
use crate::traits::VectorIndex;

/// Summary of one build pass.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub page_count: usize,
    pub chunk_count: usize,
    pub dimensions: usize,
}

/// Offline phase: turns a document into a populated vector index.
/// Pages are normalized and chunked, chunks are embedded in
/// bounded-concurrency batches, and everything is inserted in one
/// batch, so a failed build leaves the index untouched.
pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    options: PipelineOptions,
}

impl IndexBuilder {
    /// Options are validated here, before any work begins.
    pub fn new(embedder: Arc<dyn Embedder>, options: PipelineOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { embedder, options })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Builds a fresh in-memory index for `document`.
    pub async fn build(&self, document: &Document) -> Result<MemoryVectorIndex> {
        let index = MemoryVectorIndex::new(self.options.metric);
        self.build_into(document, &index).await?;
        Ok(index)
    }

    /// Populates `index` with the document's chunks.
    pub async fn build_into<V: VectorIndex>(
        &self,
        document: &Document,
        index: &V,
    ) -> Result<BuildReport> {
        let chunks = chunking::split_document(document, ChunkingConfig::from(&self.options))?;
        if chunks.is_empty() {
            return Ok(BuildReport {
                page_count: document.pages.len(),
                chunk_count: 0,
                dimensions: self.embedder.dimensions(),
            });
        }

        let vectors = self.embed_chunks(&chunks).await?;
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        let report = BuildReport {
            page_count: document.pages.len(),
            chunk_count: entries.len(),
            dimensions: self.embedder.dimensions(),
        };
        index.add(entries).await?;
        Ok(report)
    }

    /// Embeds chunks in batches with at most `embed_concurrency`
    /// requests in flight, returning vectors in chunk order. An early
    /// error return drops the task set and aborts in-flight batches.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let batches: Vec<Vec<String>> = chunks
            .chunks(self.options.embed_batch_size)
            .map(|batch| batch.iter().map(|chunk| chunk.text.clone()).collect())
            .collect();
        let batch_count = batches.len();

        let limiter = Arc::new(Semaphore::new(self.options.embed_concurrency));
        let mut tasks: JoinSet<Result<(usize, Vec<Vec<f32>>)>> = JoinSet::new();

        for (batch_index, texts) in batches.into_iter().enumerate() {
            let embedder = Arc::clone(&self.embedder);
            let limiter = Arc::clone(&limiter);
            let deadline = self.options.request_timeout;

            tasks.spawn(async move {
                let _permit = limiter.acquire_owned().await.map_err(|_| {
                    PipelineError::EmbeddingUnavailable(
                        "embedding concurrency limiter closed".to_string(),
                    )
                })?;

                let vectors = timeout(deadline, embedder.embed_many(&texts))
                    .await
                    .map_err(|_| PipelineError::Timeout {
                        operation: "embedding batch".to_string(),
                        timeout: deadline,
                    })??;

                if vectors.len() != texts.len() {
                    return Err(PipelineError::EmbeddingUnavailable(format!(
                        "embedder returned {} vectors for {} inputs",
                        vectors.len(),
                        texts.len()
                    )));
                }
                Ok((batch_index, vectors))
            });
        }

        let mut ordered: Vec<Option<Vec<Vec<f32>>>> = Vec::with_capacity(batch_count);
        ordered.resize_with(batch_count, || None);

        while let Some(joined) = tasks.join_next().await {
            let (batch_index, vectors) = joined.map_err(|error| {
                PipelineError::EmbeddingUnavailable(format!("embedding task failed: {error}"))
            })??;
            ordered[batch_index] = Some(vectors);
        }

        let expected = self.embedder.dimensions();
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in ordered {
            let batch = batch.ok_or_else(|| {
                PipelineError::EmbeddingUnavailable(
                    "embedding batch missing from results".to_string(),
                )
            })?;
            for vector in batch {
                if vector.len() != expected {
                    return Err(PipelineError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                vectors.push(vector);
            }
        }
        Ok(vectors)
    }
}
