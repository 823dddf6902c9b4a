//! Remote embeddings over the OpenAI-compatible `/embeddings` endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::Embedder;
use crate::llm::external::{build_client, describe_send_error, parse_json_response};
use crate::llm::ApiProvider;

pub struct ApiEmbeddings {
    provider: ApiProvider,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    client: Client,
}

impl ApiEmbeddings {
    pub fn new(
        provider: ApiProvider,
        api_key: Option<String>,
        model: String,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if provider.requires_key() && api_key.is_none() {
            return Err(anyhow!("{:?} requires an API key (set OPENAI_API_KEY)", provider));
        }

        Ok(Self {
            provider,
            api_key,
            model,
            dimension,
            client: build_client(timeout)?,
        })
    }

    /// text-embedding-3 models shorten their output to `dimensions`.
    fn request_body(&self, input: serde_json::Value) -> serde_json::Value {
        json!({
            "model": self.model,
            "input": input,
            "dimensions": self.dimension,
        })
    }

    async fn request(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let endpoint = self.provider.embeddings_endpoint(&self.model);
        let body = self.request_body(input);

        let response = self
            .provider
            .authorize(self.client.post(&endpoint), self.api_key.as_deref())
            .json(&body)
            .send()
            .await
            .map_err(|e| describe_send_error(&endpoint, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("Embeddings API error ({}): {}", status, error));
        }

        let mut parsed: EmbeddingResponse = parse_json_response(response, &endpoint).await?;
        parsed.data.sort_by_key(|d| d.index);

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(anyhow!(
                "Expected {}-dimensional embeddings from {}, got {}",
                self.dimension,
                self.model,
                bad.len()
            ));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for ApiEmbeddings {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.request(json!(text))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Embeddings API returned no vectors"))
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_query(text).await
    }

    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(json!(texts)).await?;
        if vectors.len() != texts.len() {
            return Err(anyhow!(
                "Embeddings API returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            ));
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}
