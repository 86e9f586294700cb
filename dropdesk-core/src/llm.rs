//! Chat-completion collaborator for agent messages.
//!
//! Provides a `CompletionClient` trait with implementations for:
//! - **OpenAI**: any endpoint speaking the OpenAI chat completions format
//! - **Unavailable**: stand-in when no API key is configured; always fails

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::LlmConfig;

// ============================================================================
// CompletionClient trait
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub finish_reason: Option<String>,
    pub model: String,
}

/// Abstraction over chat-completion providers. Treated as a black box by the
/// agent service: any error becomes an upstream failure for the caller.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<Completion, LlmError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Completion response had no choices")]
    EmptyResponse,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} completion attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl LlmError {
    /// Rate limits, server errors and transport failures are worth retrying.
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// OpenAI wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    model: Option<String>,
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.resolved_api_key().ok_or(LlmError::MissingApiKey)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    async fn chat_once(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::warn!(code = status.as_u16(), message = %message, "Completion API error");

            return Err(LlmError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: CompletionResponse = response.json().await?;
        let model = body.model.unwrap_or_else(|| self.model.clone());
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            model,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<Completion, LlmError> {
        let retry_strategy = ExponentialBackoff::from_millis(2)
            .factor(self.retry_delay_ms / 2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.chat_once(messages, options),
            LlmError::is_transient,
        )
        .await;

        match result {
            Ok(completion) => Ok(completion),
            Err(e) if e.is_transient() && self.max_retries > 0 => {
                tracing::error!(
                    attempts = self.max_retries + 1,
                    error = %e,
                    "All completion retry attempts failed"
                );
                Err(LlmError::RetryExhausted {
                    attempts: self.max_retries + 1,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// UnavailableCompletionClient
// ============================================================================

/// Used when no API key is configured, so the server still starts and
/// connect/disconnect keep working; messages fail as upstream errors.
#[derive(Debug, Default, Clone)]
pub struct UnavailableCompletionClient;

#[async_trait]
impl CompletionClient for UnavailableCompletionClient {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<Completion, LlmError> {
        Err(LlmError::MissingApiKey)
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// Pick the completion backend for the configured LLM section.
pub fn create_client(config: &LlmConfig) -> Box<dyn CompletionClient> {
    match OpenAiClient::new(config) {
        Ok(client) => Box::new(client),
        Err(e) => {
            tracing::warn!(error = %e, "Completion client unavailable; agent messages will fail");
            Box::new(UnavailableCompletionClient)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str, api_key: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            model: "gpt-test".to_string(),
            api_key: api_key.to_string(),
            temperature: 0.2,
            max_tokens: 64,
            timeout_secs: 5,
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn mock_completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "model": "gpt-test-0613",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[tokio::test]
    async fn test_chat_posts_messages_and_parses_choice() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(&test_config(&mock_server.uri(), "sk-test")).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-test",
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "hello" }
                ],
                "max_tokens": 64
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_completion("hi there")))
            .mount(&mock_server)
            .await;

        let messages = [ChatMessage::system("be brief"), ChatMessage::user("hello")];
        let completion = client
            .chat(&messages, &ChatOptions { temperature: 0.2, max_tokens: 64 })
            .await
            .expect("completion");

        assert_eq!(completion.content, "hi there");
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.model, "gpt-test-0613");
    }

    #[tokio::test]
    async fn test_chat_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(&test_config(&mock_server.uri(), "sk-test")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_completion("ok")))
            .mount(&mock_server)
            .await;

        let completion = client
            .chat(&[ChatMessage::user("ping")], &ChatOptions::default())
            .await
            .expect("success after retry");
        assert_eq!(completion.content, "ok");
    }

    #[tokio::test]
    async fn test_chat_exhausts_retries_on_500() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(&test_config(&mock_server.uri(), "sk-test")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "boom" }
            })))
            .expect(3)
            .mount(&mock_server)
            .await;

        let result = client.chat(&[ChatMessage::user("ping")], &ChatOptions::default()).await;
        match result {
            Err(LlmError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("boom"));
            }
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_does_not_retry_on_401() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(&test_config(&mock_server.uri(), "sk-bad")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Incorrect API key provided" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client.chat(&[ChatMessage::user("ping")], &ChatOptions::default()).await;
        match result {
            Err(LlmError::Api { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(&test_config(&mock_server.uri(), "sk-test")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": []
            })))
            .mount(&mock_server)
            .await;

        let result = client.chat(&[ChatMessage::user("ping")], &ChatOptions::default()).await;
        assert!(matches!(result, Err(LlmError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_unavailable_client_always_fails() {
        let client = UnavailableCompletionClient;
        let result = client.chat(&[ChatMessage::user("ping")], &ChatOptions::default()).await;
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
        assert_eq!(client.name(), "unavailable");
    }
}
