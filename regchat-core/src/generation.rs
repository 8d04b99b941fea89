//! Chat completion client.
//!
//! Thin wrapper over an OpenAI-compatible `/chat/completions` endpoint. The
//! only local logic is trimming the reply and spacing calls by a minimum
//! interval.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::embeddings::api_error_message;
use crate::models::ChatMessage;

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Send `messages` and return the trimmed reply text.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, GenerationError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Completion API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Completion returned no content")]
    EmptyCompletion,

    #[error("Missing API key")]
    MissingApiKey,
}

impl GenerationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GenerationError::Http(e) if e.is_timeout())
    }
}

// ============================================================================
// Throttle
// ============================================================================

/// Enforces a minimum spacing between consecutive calls across all callers.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Wait until `min_interval` has passed since the previous call returned here.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.min_interval).await;
        }
        *last = Some(Instant::now());
    }
}

// ============================================================================
// OpenAiChatClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct ChatCompletionConfig {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub min_interval: Duration,
}

impl ChatCompletionConfig {
    pub fn from_settings(api_key: String, settings: &crate::config::GenerationConfig) -> Self {
        Self {
            api_key,
            model: settings.model.clone(),
            timeout: Duration::from_secs(settings.timeout_seconds),
            min_interval: Duration::from_millis(settings.min_interval_ms),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug)]
pub struct OpenAiChatClient {
    client: Client,
    config: ChatCompletionConfig,
    base_url: String,
    throttle: Throttle,
}

impl OpenAiChatClient {
    pub fn new(config: ChatCompletionConfig) -> Result<Self, GenerationError> {
        Self::with_base_url(config, crate::OPENAI_BASE_URL.to_string())
    }

    pub fn with_base_url(
        config: ChatCompletionConfig,
        base_url: String,
    ) -> Result<Self, GenerationError> {
        if config.api_key.is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            throttle: Throttle::new(config.min_interval),
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChatClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, GenerationError> {
        self.throttle.wait().await;

        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens,
            temperature,
        };

        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = api_error_message(response.text().await.unwrap_or_default());
            return Err(GenerationError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: CompletionResponse = response.json().await?;
        let reply = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(GenerationError::EmptyCompletion)?;

        Ok(reply)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> ChatCompletionConfig {
        ChatCompletionConfig {
            api_key: "sk-test".to_string(),
            model: "gpt-4o".to_string(),
            timeout: Duration::from_secs(5),
            min_interval: Duration::ZERO,
        }
    }

    fn completion(content: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[tokio::test]
    async fn test_generate_sends_messages_and_trims_reply() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_json(serde_json::json!({
                "model": "gpt-4o",
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "hi" }
                ],
                "max_tokens": 1000,
                "temperature": 0.5
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                serde_json::json!("  Hello there.\n"),
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let reply = client.generate(&messages, 1000, 0.5).await.expect("generate failed");
        assert_eq!(reply, "Hello there.");
    }

    #[tokio::test]
    async fn test_generate_surfaces_api_error() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Incorrect API key provided" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.generate(&[ChatMessage::user("hi")], 10, 0.0).await {
            Err(GenerationError::Api { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_null_or_blank_content_is_empty_completion() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion(serde_json::Value::Null)),
            )
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion(serde_json::json!("   "))),
            )
            .mount(&mock_server)
            .await;

        for _ in 0..2 {
            assert!(matches!(
                client.generate(&[ChatMessage::user("hi")], 10, 0.0).await,
                Err(GenerationError::EmptyCompletion)
            ));
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_timeout() {
        let mock_server = MockServer::start().await;
        let mut config = test_config();
        config.timeout = Duration::from_millis(50);
        let client = OpenAiChatClient::with_base_url(config, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(serde_json::json!("late")))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let err = client
            .generate(&[ChatMessage::user("hi")], 10, 0.0)
            .await
            .expect_err("expected timeout");
        assert!(err.is_timeout(), "expected timeout, got {:?}", err);
    }

    #[tokio::test]
    async fn test_throttle_spaces_consecutive_calls() {
        let throttle = Throttle::new(Duration::from_millis(40));
        let start = Instant::now();
        throttle.wait().await;
        throttle.wait().await;
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_rejected() {
        let mut config = test_config();
        config.api_key.clear();
        assert!(matches!(
            OpenAiChatClient::new(config),
            Err(GenerationError::MissingApiKey)
        ));
    }
}
