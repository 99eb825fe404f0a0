//! OpenRouter LLM client implementation
//!
//! Async HTTP client for OpenAI-compatible chat completions with rate limit
//! handling and exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client as HttpClient;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::types::{ChatRequest, ChatResponse, LlmResponse, Message};

/// Maximum number of attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

/// A remote text completion service
///
/// Takes prompt messages, returns a text payload with token counts.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Model used when the caller does not name one
    fn default_model(&self) -> &str;

    /// Run one completion
    async fn complete(&self, messages: Vec<Message>, model: Option<&str>) -> Result<LlmResponse>;
}

/// OpenRouter LLM client
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: LlmConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("default_model", &self.config.default_model)
            .finish()
    }
}

/// Builder for creating an LlmClient
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<LlmConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the configured base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Override the configured request timeout
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<LlmClient> {
        let config = self.config.unwrap_or_default();
        let api_key = match self.api_key {
            Some(key) => key,
            None => config
                .resolved_api_key()
                .map_err(|e| Error::ConfigError(e.to_string()))?
                .ok_or_else(|| Error::LLMError("API key is required".to_string()))?,
        };

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| config.base_url.clone())
            .trim_end_matches('/')
            .to_string();

        Ok(LlmClient {
            http_client,
            config,
            api_key,
            base_url,
        })
    }
}

impl LlmClient {
    /// Create a client with the given configuration and API key
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        LlmClientBuilder::new()
            .config(config)
            .api_key(api_key)
            .build()
    }

    /// Create a client from configuration, reading the key from the environment
    pub fn from_config(config: LlmConfig) -> Result<Self> {
        LlmClientBuilder::new().config(config).build()
    }

    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute a chat request with retry on rate limits
    async fn execute_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_request(request).await {
                Ok(response) => return Ok(response),
                Err(Error::RateLimited(wait_secs)) if attempts < MAX_RETRY_ATTEMPTS => {
                    let backoff = calculate_backoff(attempts, wait_secs);
                    warn!(
                        attempt = attempts,
                        wait_ms = backoff,
                        "Rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a single request to the API
    async fn send_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Loregraph")
            .json(request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LLMError(format!("Failed to parse response: {}", e)))?;

        LlmResponse::from_chat_response(chat_response)
            .ok_or_else(|| Error::LLMError("Empty response from API".to_string()))
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn complete(&self, messages: Vec<Message>, model: Option<&str>) -> Result<LlmResponse> {
        let model = model.unwrap_or(&self.config.default_model);

        let request = ChatRequest::new(model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        self.execute_request(&request).await
    }
}

/// Map an error response onto the crate error
fn error_for_status(status: reqwest::StatusCode, body: &str) -> Error {
    match status.as_u16() {
        401 => Error::LLMError(
            "Unauthorized: Invalid API key. Set LOREGRAPH_API_KEY or OPENROUTER_API_KEY."
                .to_string(),
        ),
        429 => Error::RateLimited(extract_retry_after(body).unwrap_or(60)),
        400 => Error::LLMError(format!("Bad request: {}", body)),
        402 => Error::LLMError("Payment required: insufficient credits".to_string()),
        403 => Error::LLMError(format!("Forbidden: {}", body)),
        404 => Error::LLMError(format!("Model not found or endpoint unavailable: {}", body)),
        500..=599 => Error::LLMError(format!("Server error ({}): {}", status, body)),
        _ => Error::LLMError(format!("HTTP error {}: {}", status, body)),
    }
}

/// Backoff delay with 10% jitter
fn calculate_backoff(attempt: u32, suggested_wait: u64) -> u64 {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt.saturating_sub(1));
    let delay = base.max(suggested_wait * 1000);
    let jitter = (delay / 10).max(1);
    delay + rand::thread_rng().gen_range(0..jitter)
}

/// Extract retry-after seconds from an error body
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.get("error").and_then(|e| e.get("retry_after")))
        .and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LlmConfig {
        LlmConfig {
            default_model: "test/model".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_client_builder() {
        let client = LlmClient::builder()
            .config(test_config())
            .api_key("test-key")
            .base_url("https://example.com/v1/")
            .timeout_secs(60)
            .build()
            .unwrap();

        assert_eq!(client.default_model(), "test/model");
        assert_eq!(client.base_url(), "https://example.com/v1");
    }

    #[test]
    fn test_client_debug_hides_key() {
        let client = LlmClient::new(test_config(), "secret-key").unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("test/model"));
        assert!(!debug.contains("secret-key"));
    }

    #[test]
    fn test_client_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmClient>();
    }

    #[test]
    fn test_error_for_status() {
        let err = error_for_status(reqwest::StatusCode::TOO_MANY_REQUESTS, r#"{"retry_after": 7}"#);
        assert!(matches!(err, Error::RateLimited(7)));

        let err = error_for_status(reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(err.to_string().contains("LOREGRAPH_API_KEY"));

        let err = error_for_status(reqwest::StatusCode::BAD_GATEWAY, "upstream");
        assert!(matches!(err, Error::LLMError(msg) if msg.contains("upstream")));
    }

    #[test]
    fn test_calculate_backoff() {
        assert!(calculate_backoff(1, 0) >= BACKOFF_BASE_MS);
        assert!(calculate_backoff(2, 0) >= BACKOFF_BASE_MS * 2);
        assert!(calculate_backoff(1, 5) >= 5000);
        assert!(calculate_backoff(1, 0) < BACKOFF_BASE_MS + BACKOFF_BASE_MS / 10);
    }

    #[test]
    fn test_extract_retry_after() {
        assert_eq!(extract_retry_after(r#"{"retry_after": 30}"#), Some(30));
        assert_eq!(extract_retry_after(r#"{"error": {"retry_after": 60}}"#), Some(60));
        assert_eq!(extract_retry_after(r#"{"message": "rate limited"}"#), None);
        assert_eq!(extract_retry_after("not json"), None);
    }
}
