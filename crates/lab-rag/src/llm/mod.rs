//! LLM Module - answer generation behind a provider trait.
//! The core only sees [`LLMProvider`]; HTTP details live in [`external`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod external;

pub use external::ExternalProvider;

/// External API providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApiProvider {
    OpenAI,
    AzureOpenAI { endpoint: String, api_version: String },
    Ollama,
    /// OpenAI-compatible chat completions endpoint.
    Custom { endpoint: String },
}

impl ApiProvider {
    /// Chat completions URL. For Azure, `model` is the deployment name.
    pub fn chat_endpoint(&self, model: &str) -> String {
        match self {
            Self::OpenAI => "https://api.openai.com/v1/chat/completions".to_string(),
            Self::AzureOpenAI { endpoint, api_version } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                model,
                api_version
            ),
            Self::Ollama => "http://localhost:11434/v1/chat/completions".to_string(),
            Self::Custom { endpoint } => endpoint.clone(),
        }
    }

    pub fn embeddings_endpoint(&self, model: &str) -> String {
        match self {
            Self::OpenAI => "https://api.openai.com/v1/embeddings".to_string(),
            Self::AzureOpenAI { endpoint, api_version } => format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                endpoint.trim_end_matches('/'),
                model,
                api_version
            ),
            Self::Ollama => "http://localhost:11434/v1/embeddings".to_string(),
            Self::Custom { endpoint } => endpoint.replace("chat/completions", "embeddings"),
        }
    }

    /// Attach credentials in the header style the provider expects.
    pub fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match (self, api_key) {
            (Self::AzureOpenAI { .. }, Some(key)) => request.header("api-key", key),
            (_, Some(key)) => request.header("Authorization", format!("Bearer {}", key)),
            (_, None) => request,
        }
    }

    pub fn requires_key(&self) -> bool {
        matches!(self, Self::OpenAI | Self::AzureOpenAI { .. })
    }
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1200,
            temperature: 0.3,
        }
    }
}

/// Provider information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
}

/// Core trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion for a single user prompt.
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;

    fn info(&self) -> ProviderInfo;
}
