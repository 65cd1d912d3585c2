//! LiteLLM-compatible client implementation for self-debug.
//!
//! This module provides the message and request types shared by every chat
//! provider, the [`LlmProvider`] trait, and a client for LiteLLM-compatible
//! (OpenAI-shaped) chat completion endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::LlmError;

/// Default model used when neither the request nor the environment names one.
pub const DEFAULT_LITELLM_MODEL: &str = "gpt-35-turbo";

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Default number of retries after the first attempt for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Upper bound on a single backoff delay.
const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// Exponential backoff applied to transient chat failures.
///
/// A request is sent at most `1 + max_retries` times. Only errors for which
/// [`LlmError::is_transient`] holds are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let delay_ms = (self.base_delay.as_millis() as u64)
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY_MS);
        Duration::from_millis(delay_ms)
    }
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// `system`, `user` or `assistant`.
    pub role: String,
    pub content: String,
}

impl Message {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }
}

/// Chat completion request, independent of the provider behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier. Empty selects the provider default.
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Request with provider-default sampling settings.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Chat completion result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    /// Model that actually served the request.
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl GenerationResponse {
    /// Text of the first choice. The loop only ever asks for one.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// One completion alternative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    /// `stop`, `length`, `content_filter`, ...
    pub finish_reason: String,
}

/// Token accounting reported by the endpoint. Zeroed when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Chat completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion. Implementations own their retry policy.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Client for a LiteLLM proxy or any other OpenAI-shaped endpoint.
pub struct LiteLlmClient {
    /// Base URL without the `/chat/completions` suffix.
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    retry: RetryPolicy,
    http_client: Client,
}

impl LiteLlmClient {
    /// `api_base` is the proxy root, e.g. `http://localhost:4000`.
    pub fn new(api_base: String, api_key: Option<String>, default_model: String) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            retry: RetryPolicy::default(),
            http_client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Build a client from `LITELLM_API_BASE` (required), `LITELLM_API_KEY`
    /// and `LITELLM_DEFAULT_MODEL`.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingApiBase` if `LITELLM_API_BASE` is not set.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("LITELLM_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let default_model = env::var("LITELLM_DEFAULT_MODEL")
            .unwrap_or_else(|_| DEFAULT_LITELLM_MODEL.to_string());

        Ok(Self::new(api_base, env::var("LITELLM_API_KEY").ok(), default_model))
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

    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Wire body of `/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ApiRequest {
    pub(crate) model: String,
    pub(crate) messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    role: String,
    // Filtered completions come back with a null content.
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    code: Option<serde_json::Value>,
}

/// Finish reason reported when the completion itself was filtered.
const CONTENT_FILTER_FINISH_REASON: &str = "content_filter";

/// Map a non-success HTTP status and body to an [`LlmError`].
///
/// A 400 whose error code or message refers to the content filter becomes
/// [`LlmError::ContentFiltered`] so callers can tell policy rejections apart
/// from malformed requests.
pub(crate) fn error_from_status(status_code: u16, body: &str) -> LlmError {
    let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(body) else {
        return LlmError::ApiError {
            code: status_code,
            message: body.to_string(),
        };
    };

    let detail = error_response.error;
    if status_code == 429 {
        return LlmError::RateLimited(detail.message);
    }

    let code = detail
        .code
        .as_ref()
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_lowercase();
    let message = detail.message.to_lowercase();
    if status_code == 400
        && (code.contains("content_filter")
            || code.contains("content_policy")
            || message.contains("content management policy")
            || message.contains("content_filter")
            || message.contains("content policy"))
    {
        return LlmError::ContentFiltered(detail.message);
    }

    LlmError::ApiError {
        code: status_code,
        message: detail.message,
    }
}

/// Send one chat completion request and convert the response.
pub(crate) async fn send_chat_completion(
    http_client: &Client,
    url: &str,
    api_key: Option<&str>,
    request: &ApiRequest,
) -> Result<GenerationResponse, LlmError> {
    let mut http_request = http_client
        .post(url)
        .header("Content-Type", "application/json")
        .header("X-Title", "self-debug");

    if let Some(api_key) = api_key {
        http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
    }

    let http_response = http_request
        .json(request)
        .send()
        .await
        .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

    let status = http_response.status();
    if !status.is_success() {
        let error_text = http_response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        return Err(error_from_status(status.as_u16(), &error_text));
    }

    let api_response: ApiResponse = http_response
        .json()
        .await
        .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

    if let Some(choice) = api_response.choices.first() {
        if choice.finish_reason.as_deref() == Some(CONTENT_FILTER_FINISH_REASON) {
            return Err(LlmError::ContentFiltered(
                "completion was filtered".to_string(),
            ));
        }
    }

    let choices = api_response
        .choices
        .into_iter()
        .map(|choice| Choice {
            index: choice.index,
            message: Message {
                role: choice.message.role,
                content: choice.message.content.unwrap_or_default(),
            },
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
        .collect();

    let usage = api_response
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(GenerationResponse {
        id: api_response.id,
        model: api_response.model,
        choices,
        usage,
    })
}

/// Send a chat completion, retrying transient failures per `policy`.
pub(crate) async fn send_with_retry(
    http_client: &Client,
    url: &str,
    api_key: Option<&str>,
    request: &ApiRequest,
    policy: RetryPolicy,
) -> Result<GenerationResponse, LlmError> {
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = policy.backoff_delay(attempt);
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying chat request after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        match send_chat_completion(http_client, url, api_key, request).await {
            Ok(response) => return Ok(response),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    error = %err,
                    "Transient error, will retry"
                );
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[async_trait]
impl LlmProvider for LiteLlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
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

        let url = format!("{}/chat/completions", self.api_base);
        send_with_retry(
            &self.http_client,
            &url,
            self.api_key.as_deref(),
            &api_request,
            self.retry,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_response_first_content() {
        let response = GenerationResponse {
            id: "test-id".to_string(),
            model: "gpt-4".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("Hello!"),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        };
        assert_eq!(response.first_content(), Some("Hello!"));

        let empty = GenerationResponse {
            choices: vec![],
            ..response
        };
        assert_eq!(empty.first_content(), None);
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(
            policy.backoff_delay(12),
            Duration::from_millis(MAX_RETRY_DELAY_MS)
        );
    }

    #[test]
    fn test_error_from_status_content_filter() {
        let body = r#"{"error":{"message":"The response was filtered due to the prompt triggering Azure OpenAI's content management policy.","code":"content_filter"}}"#;
        assert!(matches!(
            error_from_status(400, body),
            LlmError::ContentFiltered(_)
        ));
    }

    #[test]
    fn test_error_from_status_plain_bad_request() {
        let body = r#"{"error":{"message":"Invalid 'messages'","code":"invalid_request"}}"#;
        assert!(matches!(
            error_from_status(400, body),
            LlmError::ApiError { code: 400, .. }
        ));
    }

    #[test]
    fn test_error_from_status_rate_limited() {
        let body = r#"{"error":{"message":"Too many requests"}}"#;
        assert!(matches!(
            error_from_status(429, body),
            LlmError::RateLimited(_)
        ));
    }

    #[test]
    fn test_error_from_status_unstructured() {
        match error_from_status(502, "bad gateway") {
            LlmError::ApiError { code, message } => {
                assert_eq!(code, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let client = LiteLlmClient::new(
            "http://localhost:65535".to_string(),
            None,
            "gpt-4".to_string(),
        )
        .with_max_retries(0);

        let request = GenerationRequest::new("gpt-4", vec![Message::user("test")]);
        let result = client.generate(request).await;
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }

    #[tokio::test]
    async fn test_generate_against_mock_server() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/chat/completions"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "id": "cmpl-1",
                    "model": "gpt-4",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "```python\nresult = 1\n```"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
                })),
            )
            .mount(&server)
            .await;

        let client = LiteLlmClient::new(server.uri(), None, "gpt-4".to_string());
        let response = client
            .generate(GenerationRequest::new("", vec![Message::user("hi")]))
            .await
            .expect("mock server should answer");

        assert_eq!(response.first_content(), Some("```python\nresult = 1\n```"));
        assert_eq!(response.usage.total_tokens, 7);
    }

    #[tokio::test]
    async fn test_generate_filtered_completion() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "id": "cmpl-2",
                    "model": "gpt-4",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": null},
                        "finish_reason": "content_filter"
                    }]
                })),
            )
            .mount(&server)
            .await;

        let client = LiteLlmClient::new(server.uri(), None, "gpt-4".to_string());
        let result = client
            .generate(GenerationRequest::new("", vec![Message::user("hi")]))
            .await;
        assert!(matches!(result, Err(LlmError::ContentFiltered(_))));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(503).set_body_string("unavailable"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "id": "cmpl-3",
                    "model": "gpt-4",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "ok"},
                        "finish_reason": "stop"
                    }]
                })),
            )
            .mount(&server)
            .await;

        let client = LiteLlmClient::new(server.uri(), None, "gpt-4".to_string())
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(1));
        let response = client
            .generate(GenerationRequest::new("", vec![Message::user("hi")]))
            .await
            .expect("second attempt should succeed");

        assert_eq!(response.first_content(), Some("ok"));
    }

    #[tokio::test]
    async fn test_no_retries_surfaces_first_failure() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(1)
            .mount(&server)
            .await;

        let client = LiteLlmClient::new(server.uri(), None, "gpt-4".to_string())
            .with_max_retries(0);
        let result = client
            .generate(GenerationRequest::new("", vec![Message::user("hi")]))
            .await;

        assert!(matches!(result, Err(LlmError::ApiError { code: 503, .. })));
    }
}
