//! Similarity search over embedded profile documents.

pub mod flat_index;

pub use flat_index::{BuildOptions, BuildReport, FlatIndex};

use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::Result;
use crate::types::ScoredDocument;

/// How results are picked from the candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiversityMode {
    /// Plain top-k by cosine similarity.
    Similarity,
    /// Maximal marginal relevance over the `fetch_k` nearest candidates.
    Mmr { fetch_k: usize, lambda: f32 },
}

pub trait SimilarityIndex: Send + Sync {
    fn search(&self, query: &[f32], k: usize, mode: DiversityMode) -> Result<Vec<ScoredDocument>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared, swappable index. Searches hold the read lock; a rebuild only
/// takes the write lock for the final swap.
pub struct IndexHandle {
    inner: RwLock<Arc<dyn SimilarityIndex>>,
}

impl IndexHandle {
    pub fn new(index: Arc<dyn SimilarityIndex>) -> Self {
        Self {
            inner: RwLock::new(index),
        }
    }

    pub fn replace(&self, index: Arc<dyn SimilarityIndex>) {
        *self.inner.write() = index;
    }
}

impl SimilarityIndex for IndexHandle {
    fn search(&self, query: &[f32], k: usize, mode: DiversityMode) -> Result<Vec<ScoredDocument>> {
        self.inner.read().search(query, k, mode)
    }

    fn len(&self) -> usize {
        self.inner.read().len()
    }
}

/// Cosine similarity. Zero-norm vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
