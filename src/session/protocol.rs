//! Wire messages exchanged with the client and upload reassembly.

use crate::processing::{AttemptPhase, ProgressEvent};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected client input. Always terminal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// A frame could not be parsed as a client message.
    #[error("Malformed message: {0}")]
    Malformed(String),
    /// Binary frames are not part of the protocol.
    #[error("Binary frames are not supported")]
    Binary,
    /// A continuation fragment arrived before `start`.
    #[error("Received chunk before start")]
    ChunkBeforeStart,
    /// The reassembled payload is not valid base64.
    #[error("Payload is not valid base64: {0}")]
    Base64(String),
    /// The decoded payload was empty.
    #[error("Empty file received")]
    Empty,
    /// The payload exceeds the configured upload limit.
    #[error("Upload exceeds the {limit} byte limit")]
    TooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// First (possibly only) fragment of a document upload.
    Start {
        /// Base64 payload, optionally prefixed with a `data:` URL header.
        data: String,
        /// Marks the last fragment.
        #[serde(default, rename = "final")]
        is_final: Option<bool>,
        /// Number of fragments the client intends to send.
        #[serde(default)]
        total: Option<usize>,
    },
    /// Continuation fragment.
    Chunk {
        /// Base64 payload fragment.
        data: String,
        /// 1-based fragment counter.
        current: usize,
        /// Number of fragments the client intends to send.
        total: usize,
        /// Marks the last fragment.
        #[serde(default, rename = "final")]
        is_final: Option<bool>,
    },
    /// Abort the session.
    Cancel,
}

/// Coarse stage reported in status messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Upload fragments are arriving.
    #[default]
    Receiving,
    /// The document is being opened.
    Converting,
    /// Pages are being extracted.
    Processing,
    /// Chunks are being summarized.
    Analyzing,
    /// The summary is ready.
    Complete,
    /// The client cancelled the session.
    Cancelled,
}

/// Body of a `{status: ...}` message; unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusUpdate {
    /// Current stage.
    pub status: Stage,
    /// Fraction complete within the stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// 1-based page counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<usize>,
    /// Total pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
    /// 1-based chunk counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<usize>,
    /// Total chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    /// Estimate for the whole analysis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    /// Estimate for the remaining chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining: Option<String>,
    /// 1-based generation attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// `started`, `succeeded` or `failed` for the attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_status: Option<&'static str>,
    /// Characters in the chunk being attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_chars: Option<usize>,
}

impl StatusUpdate {
    /// Status message with only the stage set.
    pub fn new(status: Stage) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Set the progress fraction.
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Messages sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Stage and progress report.
    Status(StatusUpdate),
    /// Non-fatal condition.
    Warning {
        /// Human-readable warning.
        warning: String,
    },
    /// Terminal failure.
    Error {
        /// Human-readable error.
        error: String,
    },
    /// Keep-alive.
    Ping {
        /// Always `"ping"`.
        #[serde(rename = "type")]
        kind: &'static str,
    },
    /// Final summary.
    Complete {
        /// Always `true`.
        complete: bool,
        /// Assembled summary document.
        summary: String,
    },
}

impl ServerMessage {
    /// Keep-alive message.
    pub fn ping() -> Self {
        Self::Ping { kind: "ping" }
    }

    /// Final summary message.
    pub fn complete(summary: String) -> Self {
        Self::Complete {
            complete: true,
            summary,
        }
    }

    /// Terminal error message.
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Status message for `stage`.
    pub fn status(stage: Stage) -> Self {
        Self::Status(StatusUpdate::new(stage))
    }
}

fn fraction(current: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (current as f64 / total as f64).min(1.0)
}

impl From<ProgressEvent> for ServerMessage {
    fn from(event: ProgressEvent) -> Self {
        match event {
            ProgressEvent::Converting => Self::status(Stage::Converting),
            ProgressEvent::PageProcessed { current, total } => Self::Status(StatusUpdate {
                current_page: Some(current),
                total_pages: Some(total),
                ..StatusUpdate::new(Stage::Processing).with_progress(fraction(current, total))
            }),
            ProgressEvent::AnalysisStarted {
                total_chunks,
                estimated_time,
            } => Self::Status(StatusUpdate {
                current_chunk: Some(0),
                total_chunks: Some(total_chunks),
                estimated_time: Some(estimated_time),
                ..StatusUpdate::new(Stage::Analyzing).with_progress(0.0)
            }),
            ProgressEvent::ChunkAttempt {
                index,
                total,
                attempt,
                chars,
                phase,
            } => Self::Status(StatusUpdate {
                current_chunk: Some(index + 1),
                total_chunks: Some(total),
                attempt: Some(attempt),
                attempt_status: Some(match phase {
                    AttemptPhase::Started => "started",
                    AttemptPhase::Succeeded => "succeeded",
                    AttemptPhase::Failed => "failed",
                }),
                chunk_chars: Some(chars),
                ..StatusUpdate::new(Stage::Analyzing)
            }),
            ProgressEvent::ChunkFinished {
                current,
                total,
                estimated_remaining,
            } => Self::Status(StatusUpdate {
                current_chunk: Some(current),
                total_chunks: Some(total),
                estimated_remaining: Some(estimated_remaining),
                ..StatusUpdate::new(Stage::Analyzing).with_progress(fraction(current, total))
            }),
            ProgressEvent::Warning(warning) => Self::Warning { warning },
        }
    }
}

/// Collects base64 upload fragments until the final one arrives.
///
/// Fragments are concatenated as text and decoded once, so a fragment boundary may fall inside
/// a base64 quantum.
#[derive(Debug)]
pub struct FragmentBuffer {
    encoded: Option<String>,
    max_bytes: usize,
}

impl FragmentBuffer {
    /// Create a buffer that rejects payloads larger than `max_bytes` once decoded.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            encoded: None,
            max_bytes,
        }
    }

    /// Whether a `start` fragment has been accepted.
    pub fn is_started(&self) -> bool {
        self.encoded.is_some()
    }

    /// Accept a `start` fragment, discarding anything buffered before it.
    pub fn start(&mut self, data: &str) -> Result<(), InputError> {
        let mut encoded = String::new();
        push_fragment(&mut encoded, strip_data_url(data), self.max_bytes)?;
        self.encoded = Some(encoded);
        Ok(())
    }

    /// Accept a continuation fragment.
    pub fn append(&mut self, data: &str) -> Result<(), InputError> {
        let max_bytes = self.max_bytes;
        let encoded = self.encoded.as_mut().ok_or(InputError::ChunkBeforeStart)?;
        push_fragment(encoded, data, max_bytes)
    }

    /// Decode the buffered payload.
    pub fn finish(self) -> Result<Vec<u8>, InputError> {
        let encoded = self.encoded.ok_or(InputError::ChunkBeforeStart)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|error| InputError::Base64(error.to_string()))?;
        if bytes.is_empty() {
            return Err(InputError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(InputError::TooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(bytes)
    }
}

fn push_fragment(encoded: &mut String, data: &str, max_bytes: usize) -> Result<(), InputError> {
    encoded.extend(data.chars().filter(|c| !c.is_ascii_whitespace()));
    if encoded.len() / 4 * 3 > max_bytes.saturating_add(3) {
        return Err(InputError::TooLarge { limit: max_bytes });
    }
    Ok(())
}

/// Drop a leading `data:<mime>;base64,` header if present.
pub fn strip_data_url(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some(comma) = data.find(',') {
            return &data[comma + 1..];
        }
    }
    data
}

/// Whether a `start` fragment is also the last one.
pub fn start_is_final(is_final: Option<bool>, total: Option<usize>) -> bool {
    match is_final {
        Some(flag) => flag,
        None => total.is_none_or(|total| total <= 1),
    }
}

/// Whether a continuation fragment is the last one.
pub fn chunk_is_final(is_final: Option<bool>, current: usize, total: usize) -> bool {
    is_final.unwrap_or(false) || current >= total
}
