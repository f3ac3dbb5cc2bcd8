use std::sync::Arc;

use tokio::time::timeout;

use crate::answer::AnswerGenerator;
use crate::embeddings::Embedder;
use crate::error::{PipelineError, Result};
use crate::models::{PipelineOptions, ScoredChunk};
use crate::traits::VectorIndex;

/// Answer text plus the chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct GroundedAnswer {
    pub answer: String,
    pub sources: Vec<ScoredChunk>,
}

/// Online phase: embeds a question with the same embedder used at
/// build time and ranks chunks from the index. Callers are responsible
/// for pairing embedder and index; a stale pairing surfaces as
/// `DimensionMismatch`, never as an empty result.
pub struct Retriever<V: VectorIndex> {
    embedder: Arc<dyn Embedder>,
    index: Arc<V>,
    options: PipelineOptions,
}

impl<V: VectorIndex> Retriever<V> {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<V>, options: PipelineOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            embedder,
            index,
            options,
        })
    }

    /// The `k` chunks nearest to `query`, best first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Err(PipelineError::InvalidConfiguration(
                "query is empty".to_string(),
            ));
        }
        if k == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "k must be positive".to_string(),
            ));
        }

        let deadline = self.options.request_timeout;
        let vector = timeout(deadline, self.embedder.embed(query))
            .await
            .map_err(|_| PipelineError::Timeout {
                operation: "query embedding".to_string(),
                timeout: deadline,
            })??;

        self.index.query(&vector, k).await
    }

    /// Ranked chunk texts with the scores discarded.
    pub async fn retrieve_texts(&self, query: &str, k: usize) -> Result<Vec<String>> {
        Ok(self
            .retrieve(query, k)
            .await?
            .into_iter()
            .map(|hit| hit.chunk.text)
            .collect())
    }

    /// Retrieves context for `question` and makes a single bounded
    /// generation attempt.
    pub async fn answer<G: AnswerGenerator>(
        &self,
        generator: &G,
        question: &str,
        k: usize,
    ) -> Result<GroundedAnswer> {
        let sources = self.retrieve(question, k).await?;
        let context: Vec<String> = sources
            .iter()
            .map(|hit| hit.chunk.text.clone())
            .collect();

        let deadline = self.options.request_timeout;
        let answer = timeout(deadline, generator.generate(question, &context))
            .await
            .map_err(|_| PipelineError::Timeout {
                operation: "answer generation".to_string(),
                timeout: deadline,
            })??;

        Ok(GroundedAnswer { answer, sources })
    }
}
