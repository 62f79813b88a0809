use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing summarization activity across sessions.
#[derive(Default)]
pub struct SessionMetrics {
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    sessions_cancelled: AtomicU64,
    chunks_summarized: AtomicU64,
    chunks_failed: AtomicU64,
}

impl SessionMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly connected session.
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session that delivered a summary.
    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session that ended with a terminal error.
    pub fn record_session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session cancelled by the client or by a disconnect.
    pub fn record_session_cancelled(&self) {
        self.sessions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one chunk.
    pub fn record_chunk(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.chunks_summarized
        } else {
            &self.chunks_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            sessions_cancelled: self.sessions_cancelled.load(Ordering::Relaxed),
            chunks_summarized: self.chunks_summarized.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of session counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Sessions accepted since startup.
    pub sessions_started: u64,
    /// Sessions that delivered a summary.
    pub sessions_completed: u64,
    /// Sessions that ended with a terminal error.
    pub sessions_failed: u64,
    /// Sessions cancelled by the client or dropped by the transport.
    pub sessions_cancelled: u64,
    /// Chunks summarized successfully.
    pub chunks_summarized: u64,
    /// Chunks that exhausted their retry budget.
    pub chunks_failed: u64,
}
