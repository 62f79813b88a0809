//! Core data types and error definitions for the summarization pipeline.

use crate::extraction::ExtractionError;
use crate::generation::GenerationError;
use thiserror::Error;

/// Errors produced while splitting text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// The pipeline was configured with an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Errors produced while summarizing a single chunk.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// Every generation attempt failed.
    #[error("chunk {index} failed after {attempts} attempts: {source}")]
    Generation {
        /// 0-based index of the chunk.
        index: usize,
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the final attempt.
        #[source]
        source: GenerationError,
    },
    /// The session was cancelled while the chunk was in flight.
    #[error("summarization cancelled")]
    Cancelled,
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The document could not be opened for extraction.
    #[error("Failed to extract document text: {0}")]
    Extraction(#[from] ExtractionError),
    /// Pages were present but none yielded text.
    #[error("No text could be extracted from {pages} page(s)")]
    NoText {
        /// Number of pages inspected.
        pages: usize,
    },
    /// Chunking failed.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// No chunk could be summarized.
    #[error("All {total} section(s) failed to summarize")]
    AllChunksFailed {
        /// Number of chunks attempted.
        total: usize,
    },
    /// The run was cancelled before it finished.
    #[error("Processing cancelled")]
    Cancelled,
}

/// An ordered, 0-indexed slice of document text processed as one summarization unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk in the document.
    pub index: usize,
    /// Number of chunks the document was split into.
    pub total: usize,
    /// Chunk contents.
    pub text: String,
    /// Estimated token cost of `text`.
    pub token_count: usize,
}

impl Chunk {
    /// Number of characters in the chunk.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Outcome of summarizing one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResult {
    /// The chunk produced a summary.
    Success {
        /// Chunk index.
        index: usize,
        /// Generated summary text.
        summary: String,
    },
    /// The chunk exhausted its retry budget.
    Failure {
        /// Chunk index.
        index: usize,
        /// Human-readable failure reason.
        reason: String,
    },
}

impl ChunkResult {
    /// Chunk index this result belongs to.
    pub fn index(&self) -> usize {
        match self {
            Self::Success { index, .. } | Self::Failure { index, .. } => *index,
        }
    }

    /// Whether the chunk produced a summary.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Summary of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Final assembled document.
    pub summary: String,
    /// Number of pages in the source document.
    pub pages: usize,
    /// 0-based indices of pages that yielded no text.
    pub skipped_pages: Vec<usize>,
    /// Per-chunk results in chunk order.
    pub chunk_results: Vec<ChunkResult>,
}

impl PipelineOutcome {
    /// Number of chunks that failed.
    pub fn failed_chunks(&self) -> usize {
        self.chunk_results
            .iter()
            .filter(|result| !result.is_success())
            .count()
    }
}
