//! Exact in-memory vector index with a JSON snapshot on disk.

use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{cosine_similarity, DiversityMode, SimilarityIndex};
use crate::embeddings::Embedder;
use crate::error::{LabRagError, Result};
use crate::types::{DocumentId, ScoredDocument, SearchDocument};

pub struct FlatIndex {
    model: String,
    dimension: usize,
    documents: Vec<SearchDocument>,
    embeddings: Vec<Vec<f32>>,
}

/// Outcome of an index build. Failed documents are indexed with a zero vector.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub total: usize,
    pub failed: Vec<DocumentId>,
}

/// Batching for [`FlatIndex::build`].
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub batch_size: usize,
    /// Batches in flight at once.
    pub concurrency: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 16,
            concurrency: 4,
        }
    }
}

/// One result per document. A failed batch is retried document by document.
async fn embed_batch(
    embedder: &dyn Embedder,
    batch: &[SearchDocument],
) -> Vec<anyhow::Result<Vec<f32>>> {
    let texts: Vec<&str> = batch.iter().map(|d| d.search_text.as_str()).collect();
    match embedder.embed_documents(&texts).await {
        Ok(vectors) if vectors.len() == batch.len() => return vectors.into_iter().map(Ok).collect(),
        Ok(vectors) => warn!(
            expected = batch.len(),
            got = vectors.len(),
            "Batch embedding returned wrong count, retrying per document"
        ),
        Err(e) => debug!(
            error = %e,
            size = batch.len(),
            "Batch embedding failed, retrying per document"
        ),
    }

    let mut results = Vec::with_capacity(batch.len());
    for text in texts {
        results.push(embedder.embed_document(text).await);
    }
    results
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    model: &'a str,
    dimension: usize,
    total_count: usize,
    documents: &'a [SearchDocument],
    embeddings: &'a [Vec<f32>],
}

#[derive(Deserialize)]
struct Snapshot {
    model: String,
    dimension: usize,
    total_count: usize,
    documents: Vec<SearchDocument>,
    embeddings: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Placeholder until the first build completes.
    pub fn empty(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
            documents: Vec::new(),
            embeddings: Vec::new(),
        }
    }

    pub async fn build(
        documents: Vec<SearchDocument>,
        embedder: &dyn Embedder,
        options: BuildOptions,
    ) -> (Self, BuildReport) {
        Self::build_with_progress(documents, embedder, options, |_, _| {}).await
    }

    /// Embed every document's search text in batches, `options.concurrency`
    /// batches at a time, keeping corpus order. `on_progress(done, total)`
    /// fires per document.
    pub async fn build_with_progress<F>(
        documents: Vec<SearchDocument>,
        embedder: &dyn Embedder,
        options: BuildOptions,
        mut on_progress: F,
    ) -> (Self, BuildReport)
    where
        F: FnMut(usize, usize),
    {
        let dimension = embedder.dimension();
        let total = documents.len();
        let mut embeddings = Vec::with_capacity(total);
        let mut failed = Vec::new();

        info!(
            documents = total,
            model = embedder.model_name(),
            batch_size = options.batch_size,
            "Building similarity index"
        );

        {
            let mut batches = stream::iter(documents.chunks(options.batch_size.max(1)))
                .map(|batch| async move { (batch, embed_batch(embedder, batch).await) })
                .buffered(options.concurrency.max(1));

            while let Some((batch, results)) = batches.next().await {
                for (doc, result) in batch.iter().zip(results) {
                    let vector = match result {
                        Ok(vector) if vector.len() == dimension => Some(vector),
                        Ok(vector) => {
                            let err = LabRagError::EmbeddingFailure {
                                item: doc.id.to_string(),
                                reason: format!(
                                    "expected {} dimensions, got {}",
                                    dimension,
                                    vector.len()
                                ),
                            };
                            warn!(doc_id = %doc.id, "{}, using zero vector", err);
                            None
                        }
                        Err(e) => {
                            let err = LabRagError::EmbeddingFailure {
                                item: doc.id.to_string(),
                                reason: e.to_string(),
                            };
                            warn!(doc_id = %doc.id, "{}, using zero vector", err);
                            None
                        }
                    };

                    embeddings.push(vector.unwrap_or_else(|| {
                        failed.push(doc.id.clone());
                        vec![0.0; dimension]
                    }));
                    on_progress(embeddings.len(), total);
                }
            }
        }

        if !failed.is_empty() {
            warn!(failed = failed.len(), total, "Index built with zero-vector fallbacks");
        }

        let index = Self {
            model: embedder.model_name().to_string(),
            dimension,
            documents,
            embeddings,
        };
        (index, BuildReport { total, failed })
    }

    /// Write the snapshot atomically (temp file + rename).
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer(
                &mut writer,
                &SnapshotRef {
                    model: &self.model,
                    dimension: self.dimension,
                    total_count: self.documents.len(),
                    documents: &self.documents,
                    embeddings: &self.embeddings,
                },
            )?;
            writer.flush()?;
        }
        std::fs::rename(&tmp_path, path)?;

        info!(path = %path.display(), documents = self.documents.len(), "Index snapshot saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| LabRagError::SourceNotFound {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let entry = path.display().to_string();
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            LabRagError::DataFormat {
                entry: entry.clone(),
                reason: e.to_string(),
            }
        })?;

        let malformed = |reason: String| LabRagError::DataFormat {
            entry: entry.clone(),
            reason,
        };

        if snapshot.total_count != snapshot.documents.len()
            || snapshot.documents.len() != snapshot.embeddings.len()
        {
            return Err(malformed(format!(
                "total_count {} but {} documents and {} embeddings",
                snapshot.total_count,
                snapshot.documents.len(),
                snapshot.embeddings.len()
            )));
        }
        if let Some(pos) = snapshot
            .embeddings
            .iter()
            .position(|e| e.len() != snapshot.dimension)
        {
            return Err(malformed(format!(
                "embedding {} does not have dimension {}",
                pos, snapshot.dimension
            )));
        }

        debug!(path = %path.display(), documents = snapshot.total_count, "Index snapshot loaded");
        Ok(Self {
            model: snapshot.model,
            dimension: snapshot.dimension,
            documents: snapshot.documents,
            embeddings: snapshot.embeddings,
        })
    }

    /// True when this index was built from exactly these documents with this
    /// model at this dimension.
    pub fn matches(&self, documents: &[SearchDocument], model: &str, dimension: usize) -> bool {
        self.model == model
            && self.dimension == dimension
            && self.documents.len() == documents.len()
            && self
                .documents
                .iter()
                .zip(documents)
                .all(|(a, b)| a.id == b.id && a.search_text == b.search_text)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn documents(&self) -> &[SearchDocument] {
        &self.documents
    }

    fn ranked(&self, query: &[f32]) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .embeddings
            .par_iter()
            .enumerate()
            .map(|(i, embedding)| (i, cosine_similarity(query, embedding)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored
    }

    /// Greedy MMR: lambda * sim(q, d) - (1 - lambda) * max sim(d, selected).
    fn select_mmr(&self, candidates: &[(usize, f32)], k: usize, lambda: f32) -> Vec<(usize, f32)> {
        let mut remaining: Vec<(usize, f32)> = candidates.to_vec();
        let mut selected: Vec<(usize, f32)> = Vec::with_capacity(k.min(candidates.len()));

        while selected.len() < k && !remaining.is_empty() {
            let mut best_pos = 0;
            let mut best_score = f32::NEG_INFINITY;

            for (pos, &(idx, relevance)) in remaining.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|&(s, _)| cosine_similarity(&self.embeddings[idx], &self.embeddings[s]))
                    .fold(None, |acc: Option<f32>, sim| Some(acc.map_or(sim, |a| a.max(sim))))
                    .unwrap_or(0.0);
                let score = lambda * relevance - (1.0 - lambda) * redundancy;
                if score > best_score {
                    best_score = score;
                    best_pos = pos;
                }
            }

            selected.push(remaining.remove(best_pos));
        }
        selected
    }
}

impl SimilarityIndex for FlatIndex {
    fn search(&self, query: &[f32], k: usize, mode: DiversityMode) -> Result<Vec<ScoredDocument>> {
        if k == 0 || self.documents.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(LabRagError::EmbeddingFailure {
                item: "query".to_string(),
                reason: format!(
                    "query has {} dimensions, index has {}",
                    query.len(),
                    self.dimension
                ),
            });
        }

        let ranked = self.ranked(query);
        let picked = match mode {
            DiversityMode::Similarity => ranked.into_iter().take(k).collect(),
            DiversityMode::Mmr { fetch_k, lambda } => {
                let fetch_k = fetch_k.max(k).min(ranked.len());
                self.select_mmr(&ranked[..fetch_k], k, lambda)
            }
        };

        Ok(picked
            .into_iter()
            .map(|(idx, score)| ScoredDocument {
                document: self.documents[idx].clone(),
                score,
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    /// Looks the vector up by search text; "fail" errors out.
    struct TableEmbedder;

    fn vector_for(text: &str) -> anyhow::Result<Vec<f32>> {
        match text {
            "a" => Ok(vec![1.0, 0.0, 0.0]),
            "a2" => Ok(vec![1.0, 0.05, 0.0]),
            "b" => Ok(vec![0.0, 1.0, 0.0]),
            "c" => Ok(vec![0.0, 0.0, 1.0]),
            "short" => Ok(vec![1.0]),
            _ => Err(anyhow!("embedding service unavailable")),
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            vector_for(text)
        }

        async fn embed_document(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            vector_for(text)
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "table"
        }
    }

    fn doc(id: &str, search_text: &str) -> SearchDocument {
        SearchDocument {
            id: DocumentId::new(id),
            text: format!("card {}", id),
            search_text: search_text.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    fn options(batch_size: usize) -> BuildOptions {
        BuildOptions {
            batch_size,
            concurrency: 2,
        }
    }

    async fn sample_index() -> FlatIndex {
        let docs = vec![doc("A", "a"), doc("A2", "a2"), doc("B", "b"), doc("C", "c")];
        FlatIndex::build(docs, &TableEmbedder, options(2)).await.0
    }

    fn ids(results: &[ScoredDocument]) -> Vec<&str> {
        results.iter().map(|r| r.document.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_similarity_orders_by_cosine() {
        let index = sample_index().await;
        let results = index
            .search(&[1.0, 0.0, 0.0], 3, DiversityMode::Similarity)
            .unwrap();
        assert_eq!(ids(&results), vec!["A", "A2", "B"]);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_mmr_skips_near_duplicate() {
        let index = sample_index().await;
        let query = [1.0, 0.5, 0.0];
        let plain = index.search(&query, 2, DiversityMode::Similarity).unwrap();
        assert_eq!(ids(&plain), vec!["A2", "A"]);

        let results = index
            .search(
                &query,
                2,
                DiversityMode::Mmr {
                    fetch_k: 4,
                    lambda: 0.5,
                },
            )
            .unwrap();
        assert_eq!(ids(&results), vec!["A2", "B"]);
    }

    #[tokio::test]
    async fn test_mmr_lambda_one_is_similarity() {
        let index = sample_index().await;
        let mmr = index
            .search(
                &[1.0, 0.0, 0.0],
                3,
                DiversityMode::Mmr {
                    fetch_k: 4,
                    lambda: 1.0,
                },
            )
            .unwrap();
        let plain = index
            .search(&[1.0, 0.0, 0.0], 3, DiversityMode::Similarity)
            .unwrap();
        assert_eq!(ids(&mmr), ids(&plain));
    }

    #[tokio::test]
    async fn test_k_larger_than_corpus() {
        let index = sample_index().await;
        let results = index
            .search(
                &[0.0, 0.0, 1.0],
                10,
                DiversityMode::Mmr {
                    fetch_k: 20,
                    lambda: 0.5,
                },
            )
            .unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].document.id.as_str(), "C");
    }

    #[tokio::test]
    async fn test_failed_embeddings_become_zero_vectors() {
        let docs = vec![doc("A", "a"), doc("X", "broken"), doc("S", "short")];
        let (index, report) = FlatIndex::build(docs, &TableEmbedder, options(4)).await;

        assert_eq!(index.len(), 3);
        assert_eq!(report.total, 3);
        assert_eq!(
            report.failed,
            vec![DocumentId::new("X"), DocumentId::new("S")]
        );

        let results = index
            .search(&[1.0, 0.0, 0.0], 3, DiversityMode::Similarity)
            .unwrap();
        assert_eq!(results[0].document.id.as_str(), "A");
        assert_eq!(results[1].score, 0.0);
    }

    /// Records batch sizes; a batch fails whole if any text is unknown.
    #[derive(Default)]
    struct BatchingEmbedder {
        batches: parking_lot::Mutex<Vec<usize>>,
        singles: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Embedder for BatchingEmbedder {
        async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            vector_for(text)
        }

        async fn embed_document(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.singles
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            vector_for(text)
        }

        async fn embed_documents(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.batches.lock().push(texts.len());
            texts.iter().map(|t| vector_for(t)).collect()
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "table"
        }
    }

    #[tokio::test]
    async fn test_build_uses_batches_and_isolates_failures() {
        let docs = vec![
            doc("A", "a"),
            doc("B", "b"),
            doc("C", "c"),
            doc("X", "broken"),
            doc("A2", "a2"),
        ];
        let embedder = BatchingEmbedder::default();
        let (index, report) = FlatIndex::build(docs, &embedder, options(2)).await;

        let mut sizes = embedder.batches.lock().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2, 2]);
        assert_eq!(
            embedder.singles.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
        assert_eq!(report.failed, vec![DocumentId::new("X")]);

        let order: Vec<&str> = index.documents().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C", "X", "A2"]);
        let results = index
            .search(&[0.0, 0.0, 1.0], 1, DiversityMode::Similarity)
            .unwrap();
        assert_eq!(results[0].document.id.as_str(), "C");
    }

    #[tokio::test]
    async fn test_progress_reports_every_document() {
        let docs = vec![doc("A", "a"), doc("B", "b"), doc("C", "c")];
        let mut seen = Vec::new();
        let (index, _) =
            FlatIndex::build_with_progress(docs, &TableEmbedder, options(2), |done, total| {
                seen.push((done, total))
            })
            .await;
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
        let order: Vec<&str> = index.documents().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch_is_error() {
        let index = sample_index().await;
        let err = index
            .search(&[1.0, 0.0], 2, DiversityMode::Similarity)
            .unwrap_err();
        assert!(matches!(err, LabRagError::EmbeddingFailure { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("index.json");

        let index = sample_index().await;
        index.persist(&path).unwrap();

        let loaded = FlatIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.model(), "table");
        assert!(loaded.matches(index.documents(), "table", 3));
        assert!(!loaded.matches(index.documents(), "other-model", 3));
        assert!(!loaded.matches(index.documents(), "table", 8));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["total_count"], 4);
        assert_eq!(raw["dimension"], 3);

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FlatIndex::load(&path),
            Err(LabRagError::DataFormat { .. })
        ));

        assert!(matches!(
            FlatIndex::load(&dir.path().join("missing.json")),
            Err(LabRagError::SourceNotFound { .. })
        ));
    }
}
