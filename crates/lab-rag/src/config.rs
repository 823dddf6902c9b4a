use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::llm::{ApiProvider, GenerationConfig};
use crate::rag::rules::RuleSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabRagConfig {
    /// Professor dataset (JSON with a top-level `교수진` array).
    pub data_path: PathBuf,
    /// Persisted index snapshot.
    pub index_path: PathBuf,
    pub api: ApiConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationSettings,
    pub search: SearchConfig,
    pub classifier: ClassifierConfig,
    pub conversation: ConversationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub provider: ApiProvider,
    /// Never written back to disk; supply via `OPENAI_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub query_cache_size: usize,
    /// Documents per `/embeddings` request during an index build.
    pub batch_size: usize,
    pub build_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Output budget for the LLM classifier call.
    pub classification_max_tokens: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_k: usize,
    /// Raw candidates fetched per requested result before MMR selection.
    pub fetch_multiplier: usize,
    /// MMR balance: 1.0 = pure relevance, 0.0 = pure diversity.
    pub lambda_mult: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierPolicy {
    Llm,
    Rules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub policy: ClassifierPolicy,
    pub rules: RuleSet,
    /// Add every corpus display name to the rule set's person names.
    pub names_from_corpus: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub context_turns: usize,
    pub refine_document_limit: usize,
    pub hybrid_documents_per_side: usize,
}

impl LabRagConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.embedding.batch_size == 0 {
            return Err("embedding.batch_size must be > 0".into());
        }
        if self.embedding.build_concurrency == 0 {
            return Err("embedding.build_concurrency must be > 0".into());
        }
        if self.search.default_k == 0 {
            return Err("search.default_k must be > 0".into());
        }
        if self.search.fetch_multiplier == 0 {
            return Err("search.fetch_multiplier must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.search.lambda_mult) {
            return Err("search.lambda_mult must be in [0.0, 1.0]".into());
        }
        if self.generation.max_tokens == 0 || self.generation.classification_max_tokens == 0 {
            return Err("generation token budgets must be > 0".into());
        }
        if self.generation.timeout_secs == 0 || self.api.request_timeout_secs == 0 {
            return Err("timeouts must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `OPENAI_API_KEY`, `AZURE_OPENAI_ENDPOINT` and `OPENAI_API_VERSION`.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.api.api_key = Some(key);
            }
        }

        let endpoint = std::env::var("AZURE_OPENAI_ENDPOINT").ok().filter(|e| !e.trim().is_empty());
        let version = std::env::var("OPENAI_API_VERSION").ok().filter(|v| !v.trim().is_empty());

        match (&mut self.api.provider, endpoint) {
            (ApiProvider::AzureOpenAI { endpoint, api_version }, env_endpoint) => {
                if let Some(e) = env_endpoint {
                    *endpoint = e;
                }
                if let Some(v) = version {
                    *api_version = v;
                }
            }
            (provider, Some(e)) => {
                *provider = ApiProvider::AzureOpenAI {
                    endpoint: e,
                    api_version: version.unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
                };
            }
            _ => {}
        }
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            max_tokens: self.generation.max_tokens,
            temperature: self.generation.temperature,
        }
    }

    pub fn classification_config(&self) -> GenerationConfig {
        GenerationConfig {
            max_tokens: self.generation.classification_max_tokens,
            temperature: 0.0,
        }
    }
}

pub const DEFAULT_AZURE_API_VERSION: &str = "2024-12-01-preview";

impl Default for LabRagConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lab-rag");

        Self {
            data_path: PathBuf::from("professors_final_complete.json"),
            index_path: data_dir.join("vector_store").join("index.json"),
            api: ApiConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationSettings::default(),
            search: SearchConfig::default(),
            classifier: ClassifierConfig::default(),
            conversation: ConversationConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            provider: ApiProvider::OpenAI,
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            query_cache_size: 256,
            batch_size: 16,
            build_concurrency: 4,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 1200,
            classification_max_tokens: 200,
            timeout_secs: 90,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            fetch_multiplier: 2,
            lambda_mult: 0.5,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            policy: ClassifierPolicy::Llm,
            rules: RuleSet::default(),
            names_from_corpus: true,
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            context_turns: 3,
            refine_document_limit: 5,
            hybrid_documents_per_side: 3,
        }
    }
}
