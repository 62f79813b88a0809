//! Progress events emitted while a document is processed.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Whether a chunk attempt is starting or has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    /// The generation call is about to be issued.
    Started,
    /// The generation call returned successfully.
    Succeeded,
    /// The generation call failed.
    Failed,
}

/// Pipeline state changes reported to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The document is being opened for extraction.
    Converting,
    /// A page finished extracting.
    PageProcessed {
        /// 1-based page number.
        current: usize,
        /// Total pages.
        total: usize,
    },
    /// Chunking finished and summarization is starting.
    AnalysisStarted {
        /// Number of chunks to summarize.
        total_chunks: usize,
        /// Estimated duration for all chunks.
        estimated_time: String,
    },
    /// A generation attempt started or finished.
    ChunkAttempt {
        /// 0-based chunk index.
        index: usize,
        /// Total chunks.
        total: usize,
        /// 1-based attempt number.
        attempt: u32,
        /// Characters in the chunk.
        chars: usize,
        /// Attempt phase.
        phase: AttemptPhase,
    },
    /// A chunk resolved (successfully or not).
    ChunkFinished {
        /// 1-based count of resolved chunks.
        current: usize,
        /// Total chunks.
        total: usize,
        /// Estimated time for the remaining chunks.
        estimated_remaining: String,
    },
    /// Non-fatal condition worth surfacing to the client.
    Warning(String),
}

/// Non-blocking sender for [`ProgressEvent`]s.
///
/// Emitting never waits and never fails; events sent after the receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    sender: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// Create a sink and the receiver that observes it.
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Emit an event.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                tracing::trace!("Progress receiver dropped; discarding event");
            }
        }
    }
}
