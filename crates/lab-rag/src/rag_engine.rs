use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chat::Session;
use crate::config::{ClassifierPolicy, LabRagConfig};
use crate::corpus;
use crate::embeddings::{ApiEmbeddings, CachedEmbedder, Embedder};
use crate::error::{LabRagError, Result};
use crate::llm::{ExternalProvider, LLMProvider};
use crate::rag::{DispatchSettings, Dispatcher, LlmClassifier, QueryClassifier, RuleClassifier};
use crate::storage::{BuildOptions, BuildReport, FlatIndex, IndexHandle, SimilarityIndex};
use crate::types::SearchDocument;

/// Corpus, index and the external services wired together. Shared by sessions.
pub struct LabRecommender {
    config: LabRagConfig,
    documents: Vec<SearchDocument>,
    index: Arc<IndexHandle>,
    embedder: Arc<dyn Embedder>,
    classifier: Arc<dyn QueryClassifier>,
    dispatcher: Dispatcher,
    needs_rebuild: AtomicBool,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl LabRecommender {
    /// Connect to the configured API, load the corpus and make sure the index is usable.
    pub async fn from_config(config: LabRagConfig) -> Result<Self> {
        let (embedder, llm) = Self::connect(&config)?;
        let engine = Self::new(config, embedder, llm)?;
        if engine.needs_rebuild() {
            engine.rebuild_index().await;
        }
        Ok(engine)
    }

    /// HTTP-backed embedder (with query cache) and generator for `config.api`.
    pub fn connect(config: &LabRagConfig) -> Result<(Arc<dyn Embedder>, Arc<dyn LLMProvider>)> {
        let timeout = Duration::from_secs(config.api.request_timeout_secs);

        let embeddings = ApiEmbeddings::new(
            config.api.provider.clone(),
            config.api.api_key.clone(),
            config.embedding.model.clone(),
            config.embedding.dimension,
            timeout,
        )
        .map_err(|e| LabRagError::Config(e.to_string()))?;
        let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
            Arc::new(embeddings),
            config.embedding.query_cache_size,
        ));

        let llm: Arc<dyn LLMProvider> = Arc::new(
            ExternalProvider::new(
                config.api.provider.clone(),
                config.api.api_key.clone(),
                config.generation.model.clone(),
                timeout,
            )
            .map_err(|e| LabRagError::Config(e.to_string()))?,
        );

        Ok((embedder, llm))
    }

    /// Load the corpus and any usable snapshot. Does not embed anything;
    /// check [`Self::needs_rebuild`] afterwards.
    pub fn new(
        config: LabRagConfig,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LLMProvider>,
    ) -> Result<Self> {
        config.validate().map_err(LabRagError::Config)?;

        let profiles = corpus::load_profiles(&config.data_path)?;
        let documents = corpus::to_documents(&profiles);

        let (model, dimension) = (embedder.model_name(), embedder.dimension());
        let placeholder = || FlatIndex::empty(model, dimension);
        let (index, needs_rebuild) = match FlatIndex::load(&config.index_path) {
            Ok(index) if index.matches(&documents, model, dimension) => {
                info!(
                    path = %config.index_path.display(),
                    documents = index.len(),
                    "Loaded index snapshot"
                );
                (index, false)
            }
            Ok(index) => {
                warn!(
                    snapshot_model = index.model(),
                    snapshot_dimension = index.dimension(),
                    snapshot_documents = index.len(),
                    corpus_documents = documents.len(),
                    "Index snapshot does not match corpus, rebuilding"
                );
                (placeholder(), true)
            }
            Err(LabRagError::SourceNotFound { path, .. }) => {
                warn!(path = %path.display(), "No index snapshot, building from corpus");
                (placeholder(), true)
            }
            Err(e) => {
                warn!(error = %e, "Index snapshot unreadable, rebuilding");
                (placeholder(), true)
            }
        };

        let classifier: Arc<dyn QueryClassifier> = match config.classifier.policy {
            ClassifierPolicy::Llm => Arc::new(LlmClassifier::new(
                llm.clone(),
                config.classification_config(),
                Duration::from_secs(config.generation.timeout_secs),
                config.conversation.context_turns,
            )),
            ClassifierPolicy::Rules => {
                let mut rules = config.classifier.rules.clone();
                if config.classifier.names_from_corpus {
                    rules = rules.with_person_names(profiles.iter().map(|p| p.name.clone()));
                }
                Arc::new(RuleClassifier::new(rules))
            }
        };

        let index = Arc::new(IndexHandle::new(Arc::new(index)));
        let dispatcher = Dispatcher::new(
            index.clone(),
            embedder.clone(),
            llm,
            DispatchSettings::from_config(&config),
        );

        info!(
            profiles = profiles.len(),
            policy = ?config.classifier.policy,
            "Lab recommender ready"
        );

        Ok(Self {
            config,
            documents,
            index,
            embedder,
            classifier,
            dispatcher,
            needs_rebuild: AtomicBool::new(needs_rebuild),
            rebuild_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub async fn rebuild_index(&self) -> BuildReport {
        self.rebuild_index_with_progress(|_, _| {}).await
    }

    /// Re-embed the whole corpus, persist the snapshot, then swap it in.
    /// Searches keep using the old index until the swap.
    pub async fn rebuild_index_with_progress<F>(&self, on_progress: F) -> BuildReport
    where
        F: FnMut(usize, usize),
    {
        let _guard = self.rebuild_lock.lock().await;

        let (index, report) = FlatIndex::build_with_progress(
            self.documents.clone(),
            self.embedder.as_ref(),
            BuildOptions {
                batch_size: self.config.embedding.batch_size,
                concurrency: self.config.embedding.build_concurrency,
            },
            on_progress,
        )
        .await;

        if let Err(e) = index.persist(&self.config.index_path) {
            warn!(
                path = %self.config.index_path.display(),
                error = %e,
                "Failed to save index snapshot, keeping it in memory only"
            );
        }

        self.index.replace(Arc::new(index));
        self.needs_rebuild.store(false, Ordering::SeqCst);

        info!(
            documents = report.total,
            failed = report.failed.len(),
            "Index rebuilt"
        );
        report
    }

    pub fn new_session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self))
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::SeqCst)
    }

    /// Documents currently searchable.
    pub fn document_count(&self) -> usize {
        self.index.len()
    }

    pub fn corpus_size(&self) -> usize {
        self.documents.len()
    }

    pub fn config(&self) -> &LabRagConfig {
        &self.config
    }

    pub fn classifier(&self) -> &dyn QueryClassifier {
        self.classifier.as_ref()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
