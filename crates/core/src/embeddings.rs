use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use url::Url;

use crate::error::{PipelineError, Result};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

/// Converts text into fixed-width vectors. Every vector produced by one
/// instance has the same dimensionality for the instance's lifetime.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch form of `embed`; results align positionally with inputs.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Deterministic local embedder: hashed character trigrams, L2
/// normalized. Not a semantic model; serves offline runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let bucket = (fnv1a(window) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

fn fnv1a(window: &[char]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    let mut buf = [0u8; 4];
    for ch in window {
        for byte in ch.encode_utf8(&mut buf).bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

/// Client for an OpenAI-compatible `/embeddings` endpoint. Transient
/// failures (429, 5xx, transport) are retried with exponential backoff
/// up to `max_retries` attempts; responses are validated for count,
/// width, and finiteness before anything reaches the caller.
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    timeout: Duration,
    max_retries: usize,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let model = model.into();
        if model.trim().is_empty() {
            return Err(PipelineError::InvalidConfiguration(
                "embedding model name is empty".to_string(),
            ));
        }
        if dimensions == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "embedding dimensions must be positive".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
            dimensions,
            timeout,
            max_retries: max_retries.max(1),
        })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut attempt = 0usize;
        loop {
            let mut request = self.client.post(self.endpoint.clone()).json(&payload);
            if let Some(api_key) = &self.api_key {
                request = request.bearer_auth(api_key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = response.json().await?;
                        parsed.data.sort_by_key(|item| item.index);
                        return self.validate_response(texts.len(), parsed);
                    }

                    if retryable_status(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        sleep(retry_backoff(attempt)).await;
                        continue;
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    return Err(PipelineError::EmbeddingUnavailable(format!(
                        "embedding endpoint returned {status}: {body}"
                    )));
                }
                Err(error) => {
                    if error.is_timeout() {
                        if attempt + 1 < self.max_retries {
                            attempt += 1;
                            sleep(retry_backoff(attempt)).await;
                            continue;
                        }
                        return Err(PipelineError::Timeout {
                            operation: "embedding request".to_string(),
                            timeout: self.timeout,
                        });
                    }
                    if retryable_transport(&error) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(PipelineError::Http(error));
                }
            }
        }
    }

    fn validate_response(
        &self,
        expected_count: usize,
        response: EmbeddingResponse,
    ) -> Result<Vec<Vec<f32>>> {
        if response.data.len() != expected_count {
            return Err(PipelineError::EmbeddingUnavailable(format!(
                "endpoint returned {} embeddings for {} inputs",
                response.data.len(),
                expected_count
            )));
        }

        let mut vectors = Vec::with_capacity(expected_count);
        for item in response.data {
            if item.embedding.len() != self.dimensions {
                return Err(PipelineError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: item.embedding.len(),
                });
            }
            if item.embedding.iter().any(|value| !value.is_finite()) {
                return Err(PipelineError::EmbeddingUnavailable(
                    "endpoint returned non-finite embedding values".to_string(),
                ));
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.request_embeddings(&texts).await?;
        vectors.pop().ok_or_else(|| {
            PipelineError::EmbeddingUnavailable("endpoint returned no embedding".to_string())
        })
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts).await
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retryable_transport(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_request() || error.is_body() || error.is_decode()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let first = embedder.embed("hydraulic pressure and flow").await.unwrap();
        let second = embedder.embed("hydraulic pressure and flow").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn hash_embedder_outputs_configured_width() {
        let embedder = HashEmbedder::new(32);
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn hash_embedder_normalizes_nonempty_vectors() {
        let embedder = HashEmbedder::new(64);
        let vector = embedder.embed("some text worth hashing").await.unwrap();
        let magnitude: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn embed_many_aligns_with_inputs() {
        let embedder = HashEmbedder::new(16);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = embedder.embed_many(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("alpha").await.unwrap());
        assert_eq!(batch[1], embedder.embed("beta").await.unwrap());
    }

    #[test]
    fn http_embedder_rejects_bad_construction() {
        let timeout = Duration::from_secs(5);
        assert!(HttpEmbedder::new("not a url", "model", None, 8, timeout, 3).is_err());
        assert!(matches!(
            HttpEmbedder::new("http://localhost:9/v1/embeddings", " ", None, 8, timeout, 3),
            Err(PipelineError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            HttpEmbedder::new("http://localhost:9/v1/embeddings", "model", None, 0, timeout, 3),
            Err(PipelineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn response_with_wrong_width_is_a_dimension_mismatch() {
        let embedder = HttpEmbedder::new(
            "http://localhost:9/v1/embeddings",
            "model",
            None,
            3,
            Duration::from_secs(5),
            1,
        )
        .unwrap();

        let response = EmbeddingResponse {
            data: vec![EmbeddingData {
                embedding: vec![0.0, 1.0],
                index: 0,
            }],
        };
        assert!(matches!(
            embedder.validate_response(1, response),
            Err(PipelineError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn response_with_non_finite_values_is_malformed() {
        let embedder = HttpEmbedder::new(
            "http://localhost:9/v1/embeddings",
            "model",
            None,
            2,
            Duration::from_secs(5),
            1,
        )
        .unwrap();

        let response = EmbeddingResponse {
            data: vec![EmbeddingData {
                embedding: vec![0.5, f32::NAN],
                index: 0,
            }],
        };
        assert!(matches!(
            embedder.validate_response(1, response),
            Err(PipelineError::EmbeddingUnavailable(_))
        ));
    }

    #[test]
    fn response_with_wrong_count_is_malformed() {
        let embedder = HttpEmbedder::new(
            "http://localhost:9/v1/embeddings",
            "model",
            None,
            2,
            Duration::from_secs(5),
            1,
        )
        .unwrap();

        let response = EmbeddingResponse { data: Vec::new() };
        assert!(matches!(
            embedder.validate_response(1, response),
            Err(PipelineError::EmbeddingUnavailable(_))
        ));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        assert!(retry_backoff(1) < retry_backoff(2));
        assert_eq!(retry_backoff(5), retry_backoff(9));
    }
}
