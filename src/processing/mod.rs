//! Summarization pipeline: token counting, chunking, context threading and orchestration.

pub mod chunking;
pub mod context;
pub mod estimator;
mod pipeline;
pub mod progress;
pub mod prompt;
pub mod response;
mod summarizer;
pub mod tokens;
pub mod types;

pub use estimator::{TimeEstimator, format_duration};
pub use pipeline::{Pipeline, PipelineState, assemble};
pub use progress::{AttemptPhase, ProgressEvent, ProgressSink};
pub use summarizer::{ChunkSummary, RetryPolicy, Summarizer};
pub use types::{
    Chunk, ChunkResult, ChunkingError, PipelineError, PipelineOutcome, SummarizeError,
};
