pub mod answer;
pub mod builder;
pub mod chunking;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod models;
pub mod retriever;
pub mod stores;
pub mod traits;

pub use answer::{compose_prompt, AnswerGenerator, OpenAiChatGenerator};
pub use builder::{BuildReport, IndexBuilder};
pub use chunking::{normalize_text, split_document, split_page, ChunkingConfig};
pub use document::{load_text_document, Document};
pub use embeddings::{Embedder, HashEmbedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{PipelineError, Result};
pub use models::{Chunk, DistanceMetric, IndexEntry, PipelineOptions, ScoredChunk};
pub use retriever::{GroundedAnswer, Retriever};
pub use stores::{MemoryVectorIndex, QdrantStore};
pub use traits::VectorIndex;
