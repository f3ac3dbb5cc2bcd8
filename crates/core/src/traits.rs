use async_trait::async_trait;

use crate::error::Result;
use crate::models::{IndexEntry, ScoredChunk};

/// Nearest-neighbor store over `(chunk, vector)` entries. Entries are
/// write-once; an `add` batch becomes visible to queries all at once or
/// not at all.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts a batch of entries. Fails with `DimensionMismatch` when
    /// any vector's width disagrees with vectors already stored.
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Returns the `k` entries nearest to `vector`, ordered by ascending
    /// distance with ties broken by ascending `sequence_index`. Fewer
    /// than `k` stored entries means all of them come back. `k == 0` is
    /// an `InvalidConfiguration` error.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;
}
