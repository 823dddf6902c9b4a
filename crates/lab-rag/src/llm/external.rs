//! External API providers for LLM
//! Supports OpenAI, Azure OpenAI and OpenAI-compatible endpoints (Ollama, gateways)

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{ApiProvider, GenerationConfig, LLMProvider, ProviderInfo};

/// Build the shared HTTP client. One bounded timeout, no retries.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()?)
}

/// Parse a response body as JSON, returning a clear error if the server returned HTML.
pub(crate) async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(anyhow!(
            "Endpoint {} returned HTML instead of JSON (HTTP {}). Response: {}",
            endpoint,
            status,
            preview
        ));
    }
    serde_json::from_str::<T>(&body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        anyhow!(
            "Failed to parse JSON from {} (HTTP {}): {}. Body: {}",
            endpoint,
            status,
            e,
            preview
        )
    })
}

pub(crate) fn describe_send_error(endpoint: &str, e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        anyhow!("Request to {} timed out", endpoint)
    } else if e.is_connect() {
        anyhow!("Failed to connect to {}: {}", endpoint, e)
    } else {
        anyhow!("Request to {} failed: {}", endpoint, e)
    }
}

/// External API provider
pub struct ExternalProvider {
    provider: ApiProvider,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl ExternalProvider {
    pub fn new(
        provider: ApiProvider,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        if provider.requires_key() && api_key.is_none() {
            return Err(anyhow!("{:?} requires an API key (set OPENAI_API_KEY)", provider));
        }

        Ok(Self {
            provider,
            api_key,
            model,
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl LLMProvider for ExternalProvider {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        let endpoint = self.provider.chat_endpoint(&self.model);
        let request = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "stream": false
        });

        let response = self
            .provider
            .authorize(self.client.post(&endpoint), self.api_key.as_deref())
            .json(&request)
            .send()
            .await
            .map_err(|e| describe_send_error(&endpoint, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("API error ({}): {}", status, error));
        }

        let result: ChatCompletionResponse = parse_json_response(response, &endpoint).await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("{} returned no message content", endpoint))
    }

    fn info(&self) -> ProviderInfo {
        let name = match &self.provider {
            ApiProvider::OpenAI => "OpenAI",
            ApiProvider::AzureOpenAI { .. } => "AzureOpenAI",
            ApiProvider::Ollama => "Ollama",
            ApiProvider::Custom { .. } => "Custom",
        };
        ProviderInfo {
            name: name.to_string(),
            model: self.model.clone(),
        }
    }
}

/// Response structures
#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
