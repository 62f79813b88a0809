//! Per-connection document session.
//!
//! A session collects an upload, stages it in a temporary file, runs the [`Pipeline`] and streams
//! progress to the client. One deadline covers the whole document, from the first upload frame
//! to the final summary. The session core is transport-agnostic:
//! it reads [`Inbound`] values from one channel and writes [`ServerMessage`]s to another. The
//! WebSocket adapter lives in [`socket`].
//!
//! Every session ends with exactly one terminal message (`complete`, `error` or `cancelled`)
//! unless the client disconnected. The heartbeat is stopped and joined before that message is
//! sent, so nothing follows it.

mod heartbeat;
pub mod protocol;
pub mod socket;

pub use heartbeat::Heartbeat;
pub use protocol::{ClientMessage, InputError, ServerMessage, Stage, StatusUpdate};

use crate::config::Config;
use crate::metrics::SessionMetrics;
use crate::processing::{Pipeline, PipelineError, ProgressSink, format_duration};
use protocol::{FragmentBuffer, chunk_is_final, start_is_final};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Input delivered to a session by its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A parsed client message.
    Message(ClientMessage),
    /// A frame that is not a valid client message.
    Invalid(InputError),
    /// The transport closed.
    Closed,
}

/// Errors that end a session with an `{error}` message.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The client sent unusable input.
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] InputError),
    /// The pipeline failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// The overall processing deadline passed.
    #[error("Processing timed out after {}", describe(.0))]
    Timeout(Duration),
    /// The upload could not be staged on disk.
    #[error("Failed to stage upload: {0}")]
    Artifact(#[from] std::io::Error),
}

fn describe(duration: &Duration) -> String {
    if duration.as_secs() > 0 {
        format_duration(duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A summary was delivered.
    Completed,
    /// An error message was delivered.
    Failed(String),
    /// The client cancelled.
    Cancelled,
    /// The transport went away first.
    Disconnected,
}

/// Result of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    /// Session identifier used in logs.
    pub id: Uuid,
    /// How the session ended.
    pub outcome: SessionOutcome,
    /// Path of the staged upload, if one was written. Removed by the time the report exists.
    pub artifact: Option<PathBuf>,
}

/// Timing and size limits for sessions.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Deadline for processing one document.
    pub timeout: Duration,
    /// Interval between keep-alive pings.
    pub heartbeat_interval: Duration,
    /// Largest accepted decoded upload.
    pub max_upload_bytes: usize,
}

impl SessionSettings {
    /// Derive settings from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.session_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

/// Shared collaborators handed to every session.
#[derive(Clone)]
pub struct SessionDeps {
    /// Document pipeline.
    pub pipeline: Arc<Pipeline>,
    /// Process-wide counters.
    pub metrics: Arc<SessionMetrics>,
    /// Limits.
    pub settings: SessionSettings,
}

/// Run one session to completion.
pub async fn run_session(
    deps: SessionDeps,
    mut inbound: Receiver<Inbound>,
    outbound: Sender<ServerMessage>,
) -> SessionReport {
    let id = Uuid::new_v4();
    let span = tracing::info_span!("session", %id);
    async move {
        tracing::info!("Session opened");
        deps.metrics.record_session_started();
        let mut heartbeat = Heartbeat::spawn(outbound.clone(), deps.settings.heartbeat_interval);
        let mut artifact = None;

        let outcome = drive(&deps, &mut inbound, &outbound, &mut heartbeat, &mut artifact).await;
        heartbeat.stop().await;

        match &outcome {
            SessionOutcome::Completed => deps.metrics.record_session_completed(),
            SessionOutcome::Failed(_) => deps.metrics.record_session_failed(),
            SessionOutcome::Cancelled | SessionOutcome::Disconnected => {
                deps.metrics.record_session_cancelled()
            }
        }
        tracing::info!(outcome = ?outcome, "Session closed");
        SessionReport {
            id,
            outcome,
            artifact,
        }
    }
    .instrument(span)
    .await
}

async fn drive(
    deps: &SessionDeps,
    inbound: &mut Receiver<Inbound>,
    outbound: &Sender<ServerMessage>,
    heartbeat: &mut Heartbeat,
    artifact: &mut Option<PathBuf>,
) -> SessionOutcome {
    let deadline = Instant::now() + deps.settings.timeout;
    let timed_out = SessionError::Timeout(deps.settings.timeout);

    let bytes = match timeout_at(deadline, receive_upload(deps, inbound, outbound)).await {
        Ok(Ok(Upload::Bytes(bytes))) => bytes,
        Ok(Ok(Upload::Cancelled)) => return acknowledge_cancel(outbound, heartbeat).await,
        Ok(Ok(Upload::Disconnected)) => return SessionOutcome::Disconnected,
        Ok(Err(error)) => return fail(outbound, heartbeat, error.into()).await,
        Err(_) => {
            tracing::info!("Upload did not complete before the session deadline");
            return fail(outbound, heartbeat, timed_out).await;
        }
    };
    tracing::info!(bytes = bytes.len(), "Upload received");

    let staged = match timeout_at(deadline, stage(&bytes)).await {
        Ok(Ok(file)) => file,
        Ok(Err(error)) => return fail(outbound, heartbeat, error).await,
        Err(_) => return fail(outbound, heartbeat, timed_out).await,
    };
    drop(bytes);
    *artifact = Some(staged.path().to_path_buf());

    process(deps, inbound, outbound, heartbeat, staged.path(), deadline).await
}

enum Upload {
    Bytes(Vec<u8>),
    Cancelled,
    Disconnected,
}

async fn receive_upload(
    deps: &SessionDeps,
    inbound: &mut Receiver<Inbound>,
    outbound: &Sender<ServerMessage>,
) -> Result<Upload, InputError> {
    let mut buffer = FragmentBuffer::new(deps.settings.max_upload_bytes);
    loop {
        let message = match inbound.recv().await {
            Some(Inbound::Message(message)) => message,
            Some(Inbound::Invalid(error)) => return Err(error),
            Some(Inbound::Closed) | None => return Ok(Upload::Disconnected),
        };
        let (last, progress) = match message {
            ClientMessage::Cancel => return Ok(Upload::Cancelled),
            ClientMessage::Start {
                data,
                is_final,
                total,
            } => {
                buffer.start(&data)?;
                let progress = total.filter(|total| *total > 1).map(|total| 1.0 / total as f64);
                (start_is_final(is_final, total), progress)
            }
            ClientMessage::Chunk {
                data,
                current,
                total,
                is_final,
            } => {
                buffer.append(&data)?;
                let progress = (total > 0).then(|| (current as f64 / total as f64).min(1.0));
                (chunk_is_final(is_final, current, total), progress)
            }
        };

        let mut ack = StatusUpdate::new(Stage::Receiving);
        ack.progress = progress;
        send(outbound, ServerMessage::Status(ack)).await;
        if last {
            return buffer.finish().map(Upload::Bytes);
        }
    }
}

async fn stage(bytes: &[u8]) -> Result<tempfile::NamedTempFile, SessionError> {
    let file = tempfile::Builder::new()
        .prefix("rusty-digest-")
        .suffix(".pdf")
        .tempfile()?;
    tokio::fs::write(file.path(), bytes).await?;
    tracing::debug!(path = %file.path().display(), "Upload staged");
    Ok(file)
}

async fn process(
    deps: &SessionDeps,
    inbound: &mut Receiver<Inbound>,
    outbound: &Sender<ServerMessage>,
    heartbeat: &mut Heartbeat,
    path: &std::path::Path,
    deadline: Instant,
) -> SessionOutcome {
    let cancel = CancellationToken::new();
    let (sink, mut events) = ProgressSink::channel();
    let wind_down = deps.settings.heartbeat_interval;
    let run = timeout_at(deadline, deps.pipeline.run(path, &sink, &cancel));
    tokio::pin!(run);

    loop {
        tokio::select! {
            biased;
            message = inbound.recv() => match message {
                Some(Inbound::Message(ClientMessage::Cancel)) => {
                    tracing::info!("Client cancelled processing");
                    cancel.cancel();
                    let outcome = acknowledge_cancel(outbound, heartbeat).await;
                    if tokio::time::timeout(wind_down, &mut run).await.is_err() {
                        tracing::warn!("Pipeline did not wind down in time; abandoning it");
                    }
                    return outcome;
                }
                Some(Inbound::Closed) | None => {
                    tracing::info!("Client disconnected during processing");
                    cancel.cancel();
                    let _ = tokio::time::timeout(wind_down, &mut run).await;
                    return SessionOutcome::Disconnected;
                }
                Some(other) => {
                    tracing::debug!(message = ?other, "Ignoring message received while processing");
                }
            },
            Some(event) = events.recv() => {
                send(outbound, ServerMessage::from(event)).await;
            }
            result = &mut run => {
                while let Ok(event) = events.try_recv() {
                    send(outbound, ServerMessage::from(event)).await;
                }
                return match result {
                    Ok(Ok(outcome)) => {
                        heartbeat.stop().await;
                        send(
                            outbound,
                            ServerMessage::Status(StatusUpdate::new(Stage::Complete).with_progress(1.0)),
                        )
                        .await;
                        send(outbound, ServerMessage::complete(outcome.summary)).await;
                        SessionOutcome::Completed
                    }
                    Ok(Err(PipelineError::Cancelled)) => acknowledge_cancel(outbound, heartbeat).await,
                    Ok(Err(error)) => fail(outbound, heartbeat, error.into()).await,
                    Err(_) => {
                        cancel.cancel();
                        fail(outbound, heartbeat, SessionError::Timeout(deps.settings.timeout)).await
                    }
                };
            }
        }
    }
}

async fn acknowledge_cancel(
    outbound: &Sender<ServerMessage>,
    heartbeat: &mut Heartbeat,
) -> SessionOutcome {
    heartbeat.stop().await;
    send(outbound, ServerMessage::status(Stage::Cancelled)).await;
    SessionOutcome::Cancelled
}

async fn fail(
    outbound: &Sender<ServerMessage>,
    heartbeat: &mut Heartbeat,
    error: SessionError,
) -> SessionOutcome {
    let message = error.to_string();
    tracing::warn!(error = %message, "Session failed");
    heartbeat.stop().await;
    send(outbound, ServerMessage::error(message.clone())).await;
    SessionOutcome::Failed(message)
}

async fn send(outbound: &Sender<ServerMessage>, message: ServerMessage) {
    if outbound.send(message).await.is_err() {
        tracing::debug!("Outbound channel closed; dropping message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_deadline() {
        assert_eq!(
            SessionError::Timeout(Duration::from_secs(300)).to_string(),
            "Processing timed out after 5m"
        );
        assert_eq!(
            SessionError::Timeout(Duration::from_millis(250)).to_string(),
            "Processing timed out after 250ms"
        );
    }

    #[test]
    fn invalid_input_is_prefixed() {
        let error = SessionError::from(InputError::ChunkBeforeStart);
        assert_eq!(error.to_string(), "Invalid input: Received chunk before start");
    }
}
