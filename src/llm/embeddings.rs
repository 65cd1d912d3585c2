//! Embedding client for OpenAI-compatible `/embeddings` endpoints.
//!
//! Used by the retrieval layer to embed rendered Stack Overflow threads at
//! ingest time and problem descriptions at query time.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::litellm::error_from_status;

/// Default embedding API URL.
pub const DEFAULT_EMBEDDINGS_URL: &str = "https://api.openai.com/v1";

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Trait for services that turn text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of inputs. The result has one vector per input, in input
    /// order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Embed a single input.
    async fn embed_one(&self, input: &str) -> Result<Vec<f32>, LlmError> {
        let mut vectors = self.embed(&[input.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::ParseError("Embedding response was empty".to_string()))
    }
}

/// Client for an OpenAI-compatible embedding endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl OpenAiEmbeddingClient {
    /// Create a new client against the default endpoint.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            base_url: DEFAULT_EMBEDDINGS_URL.to_string(),
            api_key,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
        }
    }

    /// Set the embedding model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (for proxies or compatible APIs).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let mut http_request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: inputs,
        });
        if let Some(api_key) = &self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(error_from_status(status.as_u16(), &body));
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            LlmError::ParseError(format!("Failed to parse embedding response: {}", e))
        })?;

        if parsed.data.len() != inputs.len() {
            return Err(LlmError::ParseError(format!(
                "Expected {} embeddings, received {}",
                inputs.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
