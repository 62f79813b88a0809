//! Text-generation collaborator used to summarize document chunks.
//!
//! The pipeline only depends on [`GenerationClient`]; the Ollama adapter issues chat requests
//! directly against the runtime's HTTP API. Failures surface as [`GenerationError`] so the
//! summarizer can decide whether to retry.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while talking to the text-generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Backend could not be reached or refused the request route.
    #[error("Generation backend unavailable: {0}")]
    Unavailable(String),
    /// Backend returned an error response.
    #[error("Failed to generate text: {0}")]
    Failed(String),
    /// Backend response could not be decoded.
    #[error("Malformed backend response: {0}")]
    InvalidResponse(String),
    /// Backend did not answer within the per-call timeout.
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions that frame the conversation.
    System,
    /// Content supplied by the caller.
    User,
    /// Content produced by the model.
    Assistant,
}

/// A single chat message sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author.
    pub role: ChatRole,
    /// Message body.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Request payload passed to the generation backend.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Model identifier understood by the backend.
    pub model: String,
    /// Conversation to complete.
    pub messages: Vec<ChatMessage>,
}

/// Interface implemented by text-generation backends.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Complete the conversation and return the raw response text.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;

    /// Check that the backend is reachable without generating anything.
    async fn probe(&self) -> Result<(), GenerationError>;
}

/// Ollama-backed [`GenerationClient`] using the `/api/chat` endpoint.
pub struct OllamaClient {
    http: Client,
    base_url: String,
    call_timeout: Duration,
    probe_timeout: Duration,
}

impl OllamaClient {
    /// Build a client for the runtime at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        call_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .user_agent("rusty-digest/summary")
            .build()
            .map_err(|error| {
                GenerationError::Unavailable(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            call_timeout,
            probe_timeout,
        })
    }

    /// Base URL of the runtime.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    fn map_transport_error(&self, error: reqwest::Error, timeout: Duration) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout(timeout)
        } else {
            GenerationError::Unavailable(format!(
                "failed to reach Ollama at {}: {error}",
                self.base_url
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
    #[serde(default = "default_done")]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatMessage {
    content: String,
}

fn default_done() -> bool {
    true
}

#[async_trait]
impl GenerationClient for OllamaClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let payload = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": 0.2,
            }
        });

        let endpoint = self.endpoint("/api/chat");
        let response = self
            .http
            .post(&endpoint)
            .timeout(self.call_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|error| self.map_transport_error(error, self.call_timeout))?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Unavailable(format!(
                "Ollama endpoint {endpoint} returned 404: {body}"
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Failed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaChatResponse = response.json().await.map_err(|error| {
            if error.is_timeout() {
                GenerationError::Timeout(self.call_timeout)
            } else {
                GenerationError::InvalidResponse(format!(
                    "failed to decode Ollama response: {error}"
                ))
            }
        })?;

        if !body.done {
            return Err(GenerationError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.message.content)
    }

    async fn probe(&self) -> Result<(), GenerationError> {
        let response = self
            .http
            .get(self.endpoint("/api/tags"))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|error| self.map_transport_error(error, self.probe_timeout))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(GenerationError::Failed(format!(
                "Ollama health probe returned {}",
                response.status()
            )))
        }
    }
}
