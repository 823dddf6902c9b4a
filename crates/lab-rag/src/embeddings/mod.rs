pub mod api;

pub use api::ApiEmbeddings;

use anyhow::Result;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Unified embedding model trait
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a search query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a document/passage
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch embed documents for ingestion
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_document(text).await?);
        }
        Ok(vectors)
    }

    /// Embedding vector dimension
    fn dimension(&self) -> usize;

    /// Model identifier recorded in index snapshots.
    fn model_name(&self) -> &str;
}

/// Query-side LRU cache in front of another embedder.
/// Document embeddings pass straight through.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.lock().len()
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.lock().get(text) {
            return Ok(hit.clone());
        }

        let vector = self.inner.embed_query(text).await?;
        self.cache.lock().put(text.to_string(), vector.clone());
        Ok(vector)
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed_document(text).await
    }

    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_documents(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.chars().count() as f32, 1.0])
        }

        async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
            self.embed_query(text).await
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_repeated_query_hits_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), 2);

        let first = cached.embed_query("나노 의학").await.unwrap();
        let second = cached.embed_query("나노 의학").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.cached_queries(), 1);
    }

    #[tokio::test]
    async fn test_cache_evicts_least_recent() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), 1);

        cached.embed_query("a").await.unwrap();
        cached.embed_query("b").await.unwrap();
        cached.embed_query("a").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_documents_bypass_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), 8);

        let vectors = cached.embed_documents(&["x", "yy"]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(cached.cached_queries(), 0);
    }
}
