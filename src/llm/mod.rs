//! Chat completion client used for answer synthesis.
//!
//! Any OpenAI-compatible `/chat/completions` endpoint works, including local runtimes that
//! expose the same shape. The client mirrors the embedding adapters by issuing HTTP requests
//! directly rather than pulling in a provider SDK.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::Config;

/// Errors surfaced while requesting a chat completion.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider was unreachable.
    #[error("Chat provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Chat provider returned {status}: {body}")]
    Api {
        /// HTTP status reported by the provider.
        status: StatusCode,
        /// Leading portion of the error body.
        body: String,
    },
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// One turn of a chat conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Build an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Interface implemented by chat completion providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run the conversation through the model and return the assistant's reply.
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError>;
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiChatClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChatClient {
    /// Build a client against the given base URL and model.
    pub fn new(base_url: &str, api_key: Option<&str>, model: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|key| key.to_string()),
            model: model.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: String,
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.1,
        });

        let mut request = self.http.post(self.endpoint()).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|error| {
            LlmError::ProviderUnavailable(format!(
                "failed to reach chat endpoint at {}: {error}",
                self.base_url
            ))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(LlmError::Api {
                status,
                body: snippet,
            });
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|error| {
            LlmError::InvalidResponse(format!("failed to decode chat response: {error}"))
        })?;

        let answer = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response contained no choices".into()))?;

        Ok(answer.trim().to_string())
    }
}

/// Build the chat client selected by configuration.
pub fn llm_client_from_config(config: &Config) -> Arc<dyn LlmClient + Send + Sync> {
    Arc::new(OpenAiChatClient::new(
        &config.llm_base_url,
        config.llm_api_key.as_deref(),
        &config.llm_model,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn chat_client_returns_the_first_choice() {
        let server = MockServer::start_async().await;
        let client = OpenAiChatClient::new(&server.base_url(), Some("sk-test"), "gpt-4o-mini");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{ "model": "gpt-4o-mini" }"#);
                then.status(200).json_body(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "  The answer. [report.pdf#page=2]  " } }
                    ]
                }));
            })
            .await;

        let answer = client
            .chat(vec![
                ChatMessage::system("You are concise."),
                ChatMessage::user("What is the answer?"),
            ])
            .await
            .expect("chat response");

        mock.assert();
        assert_eq!(answer, "The answer. [report.pdf#page=2]");
    }

    #[tokio::test]
    async fn chat_client_surfaces_error_status_and_body() {
        let server = MockServer::start_async().await;
        let client = OpenAiChatClient::new(&server.base_url(), None, "gpt-4o-mini");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429).body("rate limited");
            })
            .await;

        let error = client
            .chat(vec![ChatMessage::user("hello")])
            .await
            .expect_err("error response");

        match error {
            LlmError::Api { status, body } => {
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
                assert!(body.contains("rate limited"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn chat_client_rejects_empty_choices() {
        let server = MockServer::start_async().await;
        let client = OpenAiChatClient::new(&server.base_url(), None, "gpt-4o-mini");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let error = client
            .chat(vec![ChatMessage::user("hello")])
            .await
            .expect_err("invalid response");
        assert!(matches!(error, LlmError::InvalidResponse(_)));
    }
}
