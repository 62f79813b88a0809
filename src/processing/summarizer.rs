//! Drives one chunk through the generation backend.
//!
//! Only the generation call is retried. The prompt is built once per chunk and the response is
//! parsed once. A chunk that exhausts its attempts is reported as
//! [`SummarizeError::Generation`]; the caller records it and moves on.

use super::context::SummaryContext;
use super::progress::{AttemptPhase, ProgressEvent, ProgressSink};
use super::prompt::PromptTemplate;
use super::response::{ExtractionPath, parse_response};
use super::types::{Chunk, SummarizeError};
use crate::generation::{ChatMessage, GenerationClient, GenerationError, GenerationRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt budget and exponential backoff between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Ceiling for any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }
}

/// Successful summarization of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSummary {
    /// Context to hand to the next chunk.
    pub context: SummaryContext,
    /// Summary text for this chunk.
    pub summary: String,
    /// Attempts used.
    pub attempts: u32,
    /// How the summary was located in the response.
    pub path: ExtractionPath,
}

/// Summarizes chunks while threading [`SummaryContext`] between them.
pub struct Summarizer {
    client: Arc<dyn GenerationClient>,
    template: PromptTemplate,
    model: String,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl Summarizer {
    /// Create a summarizer for `model`.
    pub fn new(
        client: Arc<dyn GenerationClient>,
        template: PromptTemplate,
        model: impl Into<String>,
        call_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            template,
            model: model.into(),
            call_timeout,
            retry,
        }
    }

    /// Retry policy in effect.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Summarize `chunk` given the context produced by the previous chunk.
    ///
    /// Cancellation is observed while a call is in flight and during backoff; an in-flight
    /// request is abandoned rather than awaited.
    pub async fn summarize(
        &self,
        chunk: &Chunk,
        previous: &SummaryContext,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ChunkSummary, SummarizeError> {
        let messages = self.template.messages(chunk, previous);
        let chars = chunk.char_len();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let report = |phase| ProgressEvent::ChunkAttempt {
                index: chunk.index,
                total: chunk.total,
                attempt,
                chars,
                phase,
            };
            progress.emit(report(AttemptPhase::Started));
            tracing::debug!(chunk = chunk.index + 1, attempt, chars, "Requesting chunk summary");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SummarizeError::Cancelled),
                result = self.call(messages.clone()) => result,
            };

            let error = match outcome {
                Ok(raw) => {
                    progress.emit(report(AttemptPhase::Succeeded));
                    tracing::debug!(
                        chunk = chunk.index + 1,
                        attempt,
                        response_chars = raw.len(),
                        "Chunk summary received"
                    );
                    return Ok(self.interpret(chunk, previous, &raw, attempt));
                }
                Err(error) => error,
            };

            progress.emit(report(AttemptPhase::Failed));
            if attempt >= self.retry.max_attempts {
                tracing::warn!(
                    chunk = chunk.index + 1,
                    attempts = attempt,
                    error = %error,
                    "Chunk summarization exhausted its retries"
                );
                return Err(SummarizeError::Generation {
                    index: chunk.index,
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.retry.backoff(attempt);
            tracing::warn!(
                chunk = chunk.index + 1,
                attempt,
                error = %error,
                retry_in = ?delay,
                "Generation attempt failed; retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SummarizeError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn call(&self, messages: Vec<ChatMessage>) -> Result<String, GenerationError> {
        let request = GenerationRequest {
            model: self.model.clone(),
            messages,
        };
        let raw = tokio::time::timeout(self.call_timeout, self.client.generate(request))
            .await
            .map_err(|_| GenerationError::Timeout(self.call_timeout))??;
        if raw.trim().is_empty() {
            return Err(GenerationError::InvalidResponse(
                "backend returned an empty response".into(),
            ));
        }
        Ok(raw)
    }

    fn interpret(
        &self,
        chunk: &Chunk,
        previous: &SummaryContext,
        raw: &str,
        attempts: u32,
    ) -> ChunkSummary {
        let parsed = parse_response(raw);
        if parsed.path == ExtractionPath::RawText {
            tracing::warn!(
                chunk = chunk.index + 1,
                "Response lacked summary tags; using raw text"
            );
        }
        ChunkSummary {
            context: SummaryContext::update_from(previous, parsed.context),
            summary: parsed.summary.to_string(),
            attempts,
            path: parsed.path,
        }
    }
}
