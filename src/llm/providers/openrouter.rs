//! OpenRouter provider implementation.
//!
//! OpenRouter exposes an OpenAI-compatible chat endpoint in front of many
//! model vendors. Any other OpenAI-compatible base URL (Azure proxies, local
//! gateways) can be targeted with [`OpenRouterProvider::with_custom_url`].

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::litellm::{send_with_retry, ApiRequest, RetryPolicy};
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider};

pub use crate::llm::litellm::DEFAULT_MAX_RETRIES;

/// Default OpenRouter API endpoint.
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model to use if none specified.
const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenRouter provider for LLM requests.
///
/// Transient failures (network errors, rate limits, 5xx) are retried with
/// exponential backoff up to `max_retries` times. Everything else, including
/// content-policy rejections, is returned on the first occurrence.
pub struct OpenRouterProvider {
    /// HTTP client for making API requests.
    client: Client,
    /// API key for OpenRouter authentication.
    api_key: String,
    /// Base URL for the OpenRouter API.
    base_url: String,
    /// Default model to use when none is specified.
    default_model: String,
    /// Backoff for transient failures.
    retry: RetryPolicy,
}

impl OpenRouterProvider {
    /// Create a new OpenRouter provider with the given API key.
    pub fn new(api_key: String) -> Self {
        Self::with_custom_url(
            api_key,
            OPENROUTER_BASE_URL.to_string(),
            DEFAULT_MODEL.to_string(),
        )
    }

    /// Create a new OpenRouter provider with a specific default model.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenRouter API key for authentication
    /// * `model` - Default model identifier (e.g., "openai/gpt-4o")
    pub fn with_model(api_key: String, model: String) -> Self {
        Self::with_custom_url(api_key, OPENROUTER_BASE_URL.to_string(), model)
    }

    /// Create a new provider against a custom OpenAI-compatible base URL.
    ///
    /// # Arguments
    ///
    /// * `api_key` - API key for authentication
    /// * `base_url` - Custom base URL for the API
    /// * `model` - Default model identifier
    pub fn with_custom_url(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            api_key,
            base_url,
            default_model: model,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the number of retries for transient failures.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Set the base backoff delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.retry.base_delay = base_delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model used when a request leaves `model` empty.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Get the configured retry count.
    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model
        };

        let api_request = ApiRequest {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        send_with_retry(
            &self.client,
            &url,
            Some(&self.api_key),
            &api_request,
            self.retry,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "gen-1",
            "model": "test-model",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
        })
    }

    fn provider_for(server: &MockServer) -> OpenRouterProvider {
        OpenRouterProvider::with_custom_url(
            "test-key".to_string(),
            server.uri(),
            "test-model".to_string(),
        )
        .with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_openrouter_provider_new() {
        let provider = OpenRouterProvider::new("test-api-key".to_string());

        assert_eq!(provider.base_url(), OPENROUTER_BASE_URL);
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
        assert_eq!(provider.max_retries(), DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_openrouter_provider_with_model() {
        let provider =
            OpenRouterProvider::with_model("test-key".to_string(), "openai/gpt-4o".to_string());
        assert_eq!(provider.default_model(), "openai/gpt-4o");
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected_without_request() {
        let provider = OpenRouterProvider::new("  ".to_string());
        let result = provider
            .generate(GenerationRequest::new("", vec![Message::user("hi")]))
            .await;
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let provider = OpenRouterProvider::with_custom_url(
            "test-key".to_string(),
            "http://localhost:65535".to_string(),
            "test-model".to_string(),
        )
        .with_max_retries(0);

        let request = GenerationRequest::new("test-model", vec![Message::user("test")]);
        let result = provider.generate(request).await;
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }

    #[tokio::test]
    async fn test_generate_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider_for(&server)
            .generate(GenerationRequest::new("", vec![Message::user("hi")]))
            .await
            .expect("request should succeed");

        assert_eq!(response.first_content(), Some("hello"));
        assert_eq!(response.model, "test-model");
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .mount(&server)
            .await;

        let response = provider_for(&server)
            .with_max_retries(3)
            .generate(GenerationRequest::new("", vec![Message::user("hi")]))
            .await
            .expect("third attempt should succeed");

        assert_eq!(response.first_content(), Some("ok"));
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let result = provider_for(&server)
            .with_max_retries(2)
            .generate(GenerationRequest::new("", vec![Message::user("hi")]))
            .await;

        assert!(matches!(result, Err(LlmError::ApiError { code: 500, .. })));
    }

    #[tokio::test]
    async fn test_content_filter_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "message": "The response was filtered due to the prompt triggering the content management policy.",
                    "code": "content_filter"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider_for(&server)
            .generate(GenerationRequest::new("", vec![Message::user("hi")]))
            .await;

        assert!(matches!(result, Err(LlmError::ContentFiltered(_))));
    }
}
