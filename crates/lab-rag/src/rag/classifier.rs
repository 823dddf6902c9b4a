//! Query intent classification.
//!
//! Two interchangeable policies: an LLM call that returns a small JSON verdict,
//! and a deterministic keyword policy over a [`RuleSet`]. Neither ever fails;
//! anything unparseable degrades to a fresh search.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::prompts;
use super::rules::RuleSet;
use crate::chat::ConversationState;
use crate::error::{LabRagError, Result};
use crate::llm::{GenerationConfig, LLMProvider};

static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[^}]+\}").expect("static regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    NewSearch,
    RefinePrevious,
    HybridSearch,
    GeneralQuestion,
    GeneralInfo,
    ProfessorDetail,
}

impl Intent {
    /// Unknown labels map to [`Intent::NewSearch`].
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "refine_previous" => Self::RefinePrevious,
            "hybrid_search" => Self::HybridSearch,
            "general_question" => Self::GeneralQuestion,
            "general_info" => Self::GeneralInfo,
            "professor_detail" => Self::ProfessorDetail,
            _ => Self::NewSearch,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewSearch => "new_search",
            Self::RefinePrevious => "refine_previous",
            Self::HybridSearch => "hybrid_search",
            Self::GeneralQuestion => "general_question",
            Self::GeneralInfo => "general_info",
            Self::ProfessorDetail => "professor_detail",
        }
    }

    /// Whether the strategy for this intent queries the index.
    /// Refinement only does so when there is nothing to refine.
    pub fn needs_search(self) -> bool {
        matches!(
            self,
            Self::NewSearch | Self::HybridSearch | Self::ProfessorDetail
        )
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    pub reason: String,
    pub search_needed: bool,
}

impl ClassificationResult {
    fn new(intent: Intent, reason: impl Into<String>) -> Self {
        Self {
            intent,
            reason: reason.into(),
            search_needed: intent.needs_search(),
        }
    }

    /// `{new_search, "parse failure", true}`
    pub fn fallback() -> Self {
        Self {
            intent: Intent::NewSearch,
            reason: "parse failure".to_string(),
            search_needed: true,
        }
    }
}

#[async_trait]
pub trait QueryClassifier: Send + Sync {
    async fn classify(&self, query: &str, history: &ConversationState) -> ClassificationResult;
}

#[derive(Deserialize)]
struct RawClassification {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    reason: String,
    search_needed: Option<bool>,
}

/// Strip code fences and read the first JSON object that parses.
fn try_parse_classification(raw: &str) -> Result<ClassificationResult> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    for candidate in JSON_OBJECT.find_iter(cleaned) {
        let Ok(parsed) = serde_json::from_str::<RawClassification>(candidate.as_str()) else {
            continue;
        };
        let intent = parsed
            .kind
            .as_deref()
            .map(Intent::from_label)
            .unwrap_or(Intent::NewSearch);
        return Ok(ClassificationResult {
            intent,
            reason: parsed.reason,
            search_needed: parsed.search_needed.unwrap_or_else(|| intent.needs_search()),
        });
    }

    let preview: String = cleaned.chars().take(120).collect();
    Err(LabRagError::ClassificationParse(preview))
}

/// Parse-or-default: never fails, falls back to [`ClassificationResult::fallback`].
pub fn parse_classification(raw: &str) -> ClassificationResult {
    match try_parse_classification(raw) {
        Ok(result) => result,
        Err(e) => {
            debug!(error = %e, "Falling back to new_search");
            ClassificationResult::fallback()
        }
    }
}

/// Asks the generator to label the query given the last few turns.
pub struct LlmClassifier {
    llm: Arc<dyn LLMProvider>,
    config: GenerationConfig,
    timeout: Duration,
    context_turns: usize,
}

impl LlmClassifier {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        config: GenerationConfig,
        timeout: Duration,
        context_turns: usize,
    ) -> Self {
        Self {
            llm,
            config,
            timeout,
            context_turns,
        }
    }
}

#[async_trait]
impl QueryClassifier for LlmClassifier {
    async fn classify(&self, query: &str, history: &ConversationState) -> ClassificationResult {
        let prompt = prompts::classification_prompt(&history.recent_context(self.context_turns), query);

        match tokio::time::timeout(self.timeout, self.llm.generate(&prompt, &self.config)).await {
            Ok(Ok(raw)) => {
                let result = parse_classification(&raw);
                debug!(intent = %result.intent, reason = %result.reason, "LLM classification");
                result
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Classification call failed, defaulting to new_search");
                ClassificationResult::fallback()
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Classification timed out, defaulting to new_search");
                ClassificationResult::fallback()
            }
        }
    }
}

/// Ordered keyword rules: person name, follow-up marker, domain keyword, otherwise general info.
pub struct RuleClassifier {
    rules: RuleSet,
}

impl RuleClassifier {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn classify_query(&self, query: &str) -> ClassificationResult {
        if self.rules.mentions_person(query) {
            ClassificationResult::new(Intent::ProfessorDetail, "query names a professor")
        } else if self.rules.has_follow_up_marker(query) {
            ClassificationResult::new(Intent::RefinePrevious, "follow-up marker")
        } else if self.rules.has_domain_keyword(query) {
            ClassificationResult::new(Intent::NewSearch, "research-domain keyword")
        } else {
            ClassificationResult::new(Intent::GeneralInfo, "no rule matched")
        }
    }
}

#[async_trait]
impl QueryClassifier for RuleClassifier {
    async fn classify(&self, query: &str, _history: &ConversationState) -> ClassificationResult {
        self.classify_query(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderInfo;

    #[test]
    fn test_parse_plain_json() {
        let result = parse_classification(
            r#"{"type": "refine_previous", "reason": "이전 결과 필터링", "search_needed": false}"#,
        );
        assert_eq!(result.intent, Intent::RefinePrevious);
        assert_eq!(result.reason, "이전 결과 필터링");
        assert!(!result.search_needed);
    }

    #[test]
    fn test_parse_fenced_json_with_chatter() {
        let raw = "분류 결과입니다:\n```json\n{\"type\": \"hybrid_search\", \"reason\": \"merge\", \"search_needed\": true}\n```";
        let result = parse_classification(raw);
        assert_eq!(result.intent, Intent::HybridSearch);
        assert!(result.search_needed);
    }

    #[test]
    fn test_parse_garbage_defaults() {
        assert_eq!(parse_classification("no json here"), ClassificationResult::fallback());
        assert_eq!(parse_classification("{broken"), ClassificationResult::fallback());
        assert_eq!(parse_classification(""), ClassificationResult::fallback());
    }

    #[test]
    fn test_unknown_label_maps_to_new_search() {
        let result = parse_classification(r#"{"type": "chit_chat", "reason": "x"}"#);
        assert_eq!(result.intent, Intent::NewSearch);
        assert!(result.search_needed);
    }

    #[test]
    fn test_rule_order() {
        let classifier = RuleClassifier::new(RuleSet::default());
        assert_eq!(
            classifier.classify_query("강건욱 교수님 논문 알려줘").intent,
            Intent::ProfessorDetail
        );
        // person name wins over follow-up and domain words
        assert_eq!(
            classifier.classify_query("그 중 강건욱 교수님 암 연구").intent,
            Intent::ProfessorDetail
        );
        assert_eq!(
            classifier.classify_query("그 중 암 연구실만").intent,
            Intent::RefinePrevious
        );
        assert_eq!(
            classifier.classify_query("나노 의학 연구실 추천").intent,
            Intent::NewSearch
        );
        assert_eq!(
            classifier.classify_query("입학 절차가 궁금해요").intent,
            Intent::GeneralInfo
        );
    }

    #[test]
    fn test_rules_are_case_sensitive() {
        let classifier = RuleClassifier::new(RuleSet::default());
        assert_eq!(classifier.classify_query("CANCER").intent, Intent::GeneralInfo);
        assert_eq!(classifier.classify_query("cancer").intent, Intent::NewSearch);
    }

    struct FixedProvider(anyhow::Result<String>);

    #[async_trait]
    impl LLMProvider for FixedProvider {
        async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> anyhow::Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "fixed".to_string(),
                model: "fixed".to_string(),
            }
        }
    }

    fn llm_classifier(response: anyhow::Result<String>) -> LlmClassifier {
        LlmClassifier::new(
            Arc::new(FixedProvider(response)),
            GenerationConfig::default(),
            Duration::from_secs(5),
            3,
        )
    }

    #[tokio::test]
    async fn test_llm_classifier_uses_model_label() {
        let classifier = llm_classifier(Ok(
            r#"{"type": "general_question", "reason": "일반 질문", "search_needed": false}"#.to_string(),
        ));
        let result = classifier.classify("대학원 생활은 어때요?", &ConversationState::new()).await;
        assert_eq!(result.intent, Intent::GeneralQuestion);
    }

    #[tokio::test]
    async fn test_llm_failure_defaults_to_new_search() {
        let classifier = llm_classifier(Err(anyhow::anyhow!("503")));
        let result = classifier.classify("암 연구", &ConversationState::new()).await;
        assert_eq!(result, ClassificationResult::fallback());
    }
}
