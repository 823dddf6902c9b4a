//! Retrieval strategies, one per [`Intent`].
//!
//! The dispatcher reads conversation state but never writes it; the session
//! records the turn. Embedding and generation failures are absorbed here so
//! every handled query produces a non-empty answer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::classifier::Intent;
use super::prompts;
use crate::chat::ConversationState;
use crate::config::LabRagConfig;
use crate::embeddings::Embedder;
use crate::error::LabRagError;
use crate::llm::{GenerationConfig, LLMProvider};
use crate::storage::{DiversityMode, SimilarityIndex};
use crate::types::{DocumentId, SearchDocument};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub k: usize,
    pub fetch_multiplier: usize,
    pub lambda: f32,
    pub context_turns: usize,
    pub refine_document_limit: usize,
    pub hybrid_documents_per_side: usize,
    pub generation: GenerationConfig,
    pub timeout: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &LabRagConfig) -> Self {
        Self {
            k: config.search.default_k,
            fetch_multiplier: config.search.fetch_multiplier,
            lambda: config.search.lambda_mult,
            context_turns: config.conversation.context_turns,
            refine_document_limit: config.conversation.refine_document_limit,
            hybrid_documents_per_side: config.conversation.hybrid_documents_per_side,
            generation: config.generation_config(),
            timeout: Duration::from_secs(config.generation.timeout_secs),
        }
    }

    fn diversity(&self) -> DiversityMode {
        DiversityMode::Mmr {
            fetch_k: self.k * self.fetch_multiplier,
            lambda: self.lambda,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&LabRagConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub answer: String,
    pub documents: Vec<SearchDocument>,
    /// Strategy that actually ran; refinement without history runs as a new search.
    pub strategy: Intent,
}

pub struct Dispatcher {
    index: Arc<dyn SimilarityIndex>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LLMProvider>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        index: Arc<dyn SimilarityIndex>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LLMProvider>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            index,
            embedder,
            llm,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub async fn handle(&self, query: &str, intent: Intent, state: &ConversationState) -> DispatchOutcome {
        let outcome = match intent {
            Intent::NewSearch => self.new_search(query).await,
            Intent::RefinePrevious => self.refine_previous(query, state).await,
            Intent::HybridSearch => self.hybrid_search(query, state).await,
            Intent::GeneralQuestion => {
                let history = state.recent_context(self.settings.context_turns);
                self.answer_without_documents(
                    prompts::general_question_prompt(&history, query),
                    Intent::GeneralQuestion,
                )
                .await
            }
            Intent::GeneralInfo => {
                self.answer_without_documents(prompts::general_info_prompt(query), Intent::GeneralInfo)
                    .await
            }
            Intent::ProfessorDetail => self.professor_detail(query).await,
        };

        info!(
            intent = %intent,
            strategy = %outcome.strategy,
            documents = outcome.documents.len(),
            "Query dispatched"
        );
        outcome
    }

    async fn new_search(&self, query: &str) -> DispatchOutcome {
        let documents = self.retrieve(query).await;
        let answer = self
            .generate(&prompts::recommendation_prompt(&documents, query))
            .await;
        DispatchOutcome {
            answer,
            documents,
            strategy: Intent::NewSearch,
        }
    }

    async fn refine_previous(&self, query: &str, state: &ConversationState) -> DispatchOutcome {
        let previous = state.last_retrieved_documents();
        if previous.is_empty() {
            debug!("Nothing to refine, running a new search");
            return self.new_search(query).await;
        }

        let documents: Vec<SearchDocument> = previous
            .iter()
            .take(self.settings.refine_document_limit)
            .cloned()
            .collect();
        let answer = self.generate(&prompts::refine_prompt(&documents, query)).await;
        DispatchOutcome {
            answer,
            documents,
            strategy: Intent::RefinePrevious,
        }
    }

    async fn hybrid_search(&self, query: &str, state: &ConversationState) -> DispatchOutcome {
        let previous = state.last_retrieved_documents();
        if previous.is_empty() {
            return self.new_search(query).await;
        }

        let fresh = self.retrieve(query).await;
        let documents = merge_documents(previous, &fresh, self.settings.hybrid_documents_per_side);
        let answer = self.generate(&prompts::hybrid_prompt(&documents, query)).await;
        DispatchOutcome {
            answer,
            documents,
            strategy: Intent::HybridSearch,
        }
    }

    async fn professor_detail(&self, query: &str) -> DispatchOutcome {
        let documents = self.retrieve(query).await;
        let answer = self
            .generate(&prompts::professor_detail_prompt(&documents, query))
            .await;
        DispatchOutcome {
            answer,
            documents,
            strategy: Intent::ProfessorDetail,
        }
    }

    async fn answer_without_documents(&self, prompt: String, strategy: Intent) -> DispatchOutcome {
        DispatchOutcome {
            answer: self.generate(&prompt).await,
            documents: Vec::new(),
            strategy,
        }
    }

    /// MMR search for the query. A failed query embedding searches with the zero vector.
    async fn retrieve(&self, query: &str) -> Vec<SearchDocument> {
        let vector = match self.embedder.embed_query(query).await {
            Ok(vector) => vector,
            Err(e) => {
                let err = LabRagError::EmbeddingFailure {
                    item: "query".to_string(),
                    reason: e.to_string(),
                };
                warn!("{}, searching with zero vector", err);
                vec![0.0; self.embedder.dimension()]
            }
        };

        match self
            .index
            .search(&vector, self.settings.k, self.settings.diversity())
        {
            Ok(results) => {
                debug!(
                    results = results.len(),
                    top_score = results.first().map(|r| r.score).unwrap_or(0.0),
                    "Index search complete"
                );
                results.into_iter().map(|r| r.document).collect()
            }
            Err(e) => {
                warn!(error = %e, "Index search failed, answering without documents");
                Vec::new()
            }
        }
    }

    /// Bounded generation. Errors, timeouts and blank output become [`prompts::APOLOGY`].
    async fn generate(&self, prompt: &str) -> String {
        let result = match tokio::time::timeout(
            self.settings.timeout,
            self.llm.generate(prompt, &self.settings.generation),
        )
        .await
        {
            Ok(Ok(text)) if !text.trim().is_empty() => return text,
            Ok(Ok(_)) => LabRagError::GenerationFailure("empty response".to_string()),
            Ok(Err(e)) => LabRagError::GenerationFailure(e.to_string()),
            Err(_) => LabRagError::GenerationFailure(format!(
                "timed out after {}s",
                self.settings.timeout.as_secs()
            )),
        };

        warn!(provider = %self.llm.info().name, "{}, returning apology", result);
        prompts::APOLOGY.to_string()
    }
}

/// First `per_side` of `previous` then first `per_side` of `fresh`, deduplicated by id.
pub fn merge_documents(
    previous: &[SearchDocument],
    fresh: &[SearchDocument],
    per_side: usize,
) -> Vec<SearchDocument> {
    let mut seen: HashSet<&DocumentId> = HashSet::new();
    previous
        .iter()
        .take(per_side)
        .chain(fresh.iter().take(per_side))
        .filter(|doc| seen.insert(&doc.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ConversationTurn;
    use crate::llm::ProviderInfo;
    use crate::types::ScoredDocument;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(id: &str) -> SearchDocument {
        SearchDocument {
            id: DocumentId::new(id),
            text: format!("교수명: {}", id),
            search_text: id.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    /// Returns a fixed ranking and counts calls.
    struct FixedIndex {
        results: Vec<SearchDocument>,
        searches: AtomicUsize,
        modes: Mutex<Vec<(usize, DiversityMode)>>,
    }

    impl SimilarityIndex for FixedIndex {
        fn search(
            &self,
            _query: &[f32],
            k: usize,
            mode: DiversityMode,
        ) -> crate::error::Result<Vec<ScoredDocument>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.modes.lock().push((k, mode));
            Ok(self
                .results
                .iter()
                .take(k)
                .map(|d| ScoredDocument {
                    document: d.clone(),
                    score: 1.0,
                })
                .collect())
        }

        fn len(&self) -> usize {
            self.results.len()
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_query(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Err(anyhow::anyhow!("offline"))
        }

        async fn embed_document(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Err(anyhow::anyhow!("offline"))
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    struct ScriptedProvider {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> anyhow::Result<String> {
            self.prompts.lock().push(prompt.to_string());
            Ok(self.reply.clone())
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "scripted".to_string(),
                model: "scripted".to_string(),
            }
        }
    }

    fn setup(reply: &str) -> (Dispatcher, Arc<FixedIndex>, Arc<ScriptedProvider>) {
        let index = Arc::new(FixedIndex {
            results: vec![doc("C"), doc("D"), doc("E"), doc("F")],
            searches: AtomicUsize::new(0),
            modes: Mutex::new(Vec::new()),
        });
        let llm = Arc::new(ScriptedProvider {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(
            index.clone(),
            Arc::new(FailingEmbedder),
            llm.clone(),
            DispatchSettings::default(),
        );
        (dispatcher, index, llm)
    }

    fn history_with(ids: &[&str]) -> ConversationState {
        let mut state = ConversationState::new();
        state.append(ConversationTurn::new(
            "이전 질문",
            "이전 답변",
            ids.iter().map(|id| doc(id)).collect(),
            Intent::NewSearch,
        ));
        state
    }

    fn ids(docs: &[SearchDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_new_search_uses_mmr_with_fetch_multiplier() {
        let (dispatcher, index, _) = setup("추천 결과");
        let outcome = dispatcher
            .handle("암 연구", Intent::NewSearch, &ConversationState::new())
            .await;

        assert_eq!(outcome.answer, "추천 결과");
        assert_eq!(ids(&outcome.documents), vec!["C", "D", "E", "F"]);
        assert_eq!(
            index.modes.lock()[0],
            (
                5,
                DiversityMode::Mmr {
                    fetch_k: 10,
                    lambda: 0.5
                }
            )
        );
    }

    #[tokio::test]
    async fn test_refine_does_not_search() {
        let (dispatcher, index, llm) = setup("부작용 설명");
        let state = history_with(&["A", "B"]);
        let outcome = dispatcher
            .handle("그 중 부작용 연구", Intent::RefinePrevious, &state)
            .await;

        assert_eq!(index.searches.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.strategy, Intent::RefinePrevious);
        assert_eq!(ids(&outcome.documents), vec!["A", "B"]);
        assert!(llm.prompts.lock()[0].contains("이전에 추천한 교수진 정보"));
    }

    #[tokio::test]
    async fn test_refine_without_history_searches_once() {
        let (dispatcher, index, _) = setup("답변");
        let outcome = dispatcher
            .handle("더 자세히", Intent::RefinePrevious, &ConversationState::new())
            .await;
        assert_eq!(index.searches.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.strategy, Intent::NewSearch);
    }

    #[tokio::test]
    async fn test_refine_caps_documents() {
        let (dispatcher, _, _) = setup("답변");
        let state = history_with(&["1", "2", "3", "4", "5", "6", "7"]);
        let outcome = dispatcher
            .handle("그 중", Intent::RefinePrevious, &state)
            .await;
        assert_eq!(outcome.documents.len(), 5);
    }

    #[tokio::test]
    async fn test_hybrid_merges_previous_first() {
        let (dispatcher, index, _) = setup("종합 추천");
        let state = history_with(&["A", "C", "B", "Z"]);
        let outcome = dispatcher
            .handle("영상 연구도", Intent::HybridSearch, &state)
            .await;

        assert_eq!(index.searches.load(Ordering::SeqCst), 1);
        assert_eq!(ids(&outcome.documents), vec!["A", "C", "B", "D", "E"]);
    }

    #[tokio::test]
    async fn test_hybrid_without_history_matches_new_search() {
        let (dispatcher, _, _) = setup("추천");
        let empty = ConversationState::new();
        let hybrid = dispatcher.handle("암", Intent::HybridSearch, &empty).await;
        let fresh = dispatcher.handle("암", Intent::NewSearch, &empty).await;
        assert_eq!(ids(&hybrid.documents), ids(&fresh.documents));
        assert_eq!(hybrid.answer, fresh.answer);
    }

    #[tokio::test]
    async fn test_general_intents_skip_search() {
        let (dispatcher, index, llm) = setup("일반 답변");
        let state = history_with(&["A"]);

        let question = dispatcher
            .handle("대학원 생활은?", Intent::GeneralQuestion, &state)
            .await;
        let info = dispatcher
            .handle("입학 절차?", Intent::GeneralInfo, &state)
            .await;

        assert!(question.documents.is_empty());
        assert!(info.documents.is_empty());
        assert_eq!(index.searches.load(Ordering::SeqCst), 0);

        let seen = llm.prompts.lock();
        assert!(seen[0].contains("Q: 이전 질문"));
        assert!(!seen[1].contains("Q: 이전 질문"));
    }

    #[tokio::test]
    async fn test_blank_generation_becomes_apology() {
        let (dispatcher, _, _) = setup("   ");
        let outcome = dispatcher
            .handle("암 연구", Intent::NewSearch, &ConversationState::new())
            .await;
        assert_eq!(outcome.answer, prompts::APOLOGY);
        assert!(!outcome.documents.is_empty());
    }

    #[test]
    fn test_merge_dedups_by_id() {
        let previous = vec![doc("A"), doc("B"), doc("C"), doc("X")];
        let fresh = vec![doc("B"), doc("D"), doc("A"), doc("Y")];
        let merged = merge_documents(&previous, &fresh, 3);
        assert_eq!(ids(&merged), vec!["A", "B", "C", "D"]);
    }
}
