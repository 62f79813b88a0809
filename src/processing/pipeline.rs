//! Pipeline orchestrator: extraction, chunking, sequential summarization and assembly.

use super::chunking::Chunker;
use super::context::SummaryContext;
use super::estimator::TimeEstimator;
use super::progress::{ProgressEvent, ProgressSink};
use super::prompt::PromptTemplate;
use super::summarizer::{RetryPolicy, Summarizer};
use super::tokens::TokenCounter;
use super::types::{ChunkResult, PipelineError, PipelineOutcome, SummarizeError};
use crate::config::Config;
use crate::extraction::TextExtractor;
use crate::generation::GenerationClient;
use crate::metrics::SessionMetrics;
use crate::system::{MemoryProbe, SystemMemoryProbe};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const DOCUMENT_TITLE: &str = "# Document Summary";
const EMPTY_DOCUMENT_NOTE: &str = "_Nothing to summarize: the document has no pages._";

/// States a document moves through while it is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Upload fragments are being collected by the session.
    Receiving,
    /// Pages are being extracted.
    Extracting,
    /// Extracted text is being split into chunks.
    Chunking,
    /// Chunks are being summarized in order.
    Summarizing,
    /// Section summaries are being joined into the final document.
    Assembling,
    /// A summary was produced.
    Complete,
    /// The run ended with an error.
    Failed,
}

impl PipelineState {
    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Receiving => "receiving",
            Self::Extracting => "extracting",
            Self::Chunking => "chunking",
            Self::Summarizing => "summarizing",
            Self::Assembling => "assembling",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct StateTracker {
    current: PipelineState,
    started: Instant,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            current: PipelineState::Receiving,
            started: Instant::now(),
        }
    }

    fn enter(&mut self, next: PipelineState) {
        tracing::debug!(
            from = %self.current,
            to = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Pipeline state transition"
        );
        self.current = next;
    }
}

/// Drives one document from an uploaded file to an assembled summary.
///
/// A pipeline is cheap to share behind an `Arc`; all per-document state lives on the stack of
/// [`Pipeline::run`]. Only the [`TimeEstimator`] and [`SessionMetrics`] are shared between runs.
pub struct Pipeline {
    extractor: Arc<dyn TextExtractor>,
    summarizer: Summarizer,
    chunker: Chunker,
    estimator: Arc<TimeEstimator>,
    memory: Arc<dyn MemoryProbe>,
    max_memory_percent: f32,
    metrics: Arc<SessionMetrics>,
}

impl Pipeline {
    /// Assemble a pipeline from its collaborators.
    ///
    /// Memory pressure is sampled with [`SystemMemoryProbe`] against a 90% threshold and
    /// chunk counters go to a private [`SessionMetrics`] until overridden.
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        summarizer: Summarizer,
        chunker: Chunker,
        estimator: Arc<TimeEstimator>,
    ) -> Self {
        Self {
            extractor,
            summarizer,
            chunker,
            estimator,
            memory: Arc::new(SystemMemoryProbe::new()),
            max_memory_percent: 90.0,
            metrics: Arc::new(SessionMetrics::new()),
        }
    }

    /// Replace the memory probe and its threshold (percent).
    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>, max_percent: f32) -> Self {
        self.memory = probe;
        self.max_memory_percent = max_percent;
        self
    }

    /// Record chunk outcomes into shared metrics.
    pub fn with_metrics(mut self, metrics: Arc<SessionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build a pipeline from configuration.
    pub async fn from_config(
        config: &Config,
        extractor: Arc<dyn TextExtractor>,
        client: Arc<dyn GenerationClient>,
        estimator: Arc<TimeEstimator>,
        metrics: Arc<SessionMetrics>,
    ) -> Result<Self, PipelineError> {
        let template = PromptTemplate::load(config.prompt_template_path.as_deref().map(Path::new)).await;
        let retry = RetryPolicy {
            max_attempts: config.max_retries,
            initial_backoff: Duration::from_secs(config.retry_min_backoff_secs),
            max_backoff: Duration::from_secs(config.retry_max_backoff_secs),
        };
        let summarizer = Summarizer::new(
            client,
            template,
            config.summary_model.clone(),
            config.generation_timeout(),
            retry,
        );
        let chunker = Chunker::new(
            TokenCounter::for_encoding(&config.token_encoding),
            config.chunk_size,
        )?;
        Ok(Self::new(extractor, summarizer, chunker, estimator)
            .with_memory_probe(Arc::new(SystemMemoryProbe::new()), config.max_memory_percent)
            .with_metrics(metrics))
    }

    /// Shared time estimator.
    pub fn estimator(&self) -> &Arc<TimeEstimator> {
        &self.estimator
    }

    /// Process the document at `path`.
    ///
    /// Cancellation is checked between pages and between chunks, and interrupts in-flight
    /// generation calls.
    pub async fn run(
        &self,
        path: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut tracker = StateTracker::new();
        let result = self.drive(path, progress, cancel, &mut tracker).await;
        match &result {
            Ok(outcome) => {
                tracker.enter(PipelineState::Complete);
                tracing::info!(
                    pages = outcome.pages,
                    chunks = outcome.chunk_results.len(),
                    failed_chunks = outcome.failed_chunks(),
                    "Document summarized"
                );
            }
            Err(PipelineError::Cancelled) => {
                tracker.enter(PipelineState::Failed);
                tracing::info!("Document processing cancelled");
            }
            Err(error) => {
                tracker.enter(PipelineState::Failed);
                tracing::warn!(error = %error, "Document processing failed");
            }
        }
        result
    }

    async fn drive(
        &self,
        path: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
        tracker: &mut StateTracker,
    ) -> Result<PipelineOutcome, PipelineError> {
        tracker.enter(PipelineState::Extracting);
        progress.emit(ProgressEvent::Converting);
        let extracted = self.extract(path, progress, cancel).await?;
        if extracted.pages == 0 {
            tracing::info!("Document has no pages; nothing to summarize");
            return Ok(PipelineOutcome {
                summary: format!("{DOCUMENT_TITLE}\n\n{EMPTY_DOCUMENT_NOTE}"),
                pages: 0,
                skipped_pages: Vec::new(),
                chunk_results: Vec::new(),
            });
        }
        if extracted.texts.is_empty() {
            return Err(PipelineError::NoText {
                pages: extracted.pages,
            });
        }

        tracker.enter(PipelineState::Chunking);
        let combined = extracted.texts.join("\n\n");
        let chunks = self.chunker.split(&combined);
        drop(combined);
        if chunks.is_empty() {
            return Err(PipelineError::NoText {
                pages: extracted.pages,
            });
        }
        tracing::debug!(
            chunks = chunks.len(),
            max_tokens = self.chunker.max_tokens(),
            "Document chunked"
        );

        tracker.enter(PipelineState::Summarizing);
        let total = chunks.len();
        progress.emit(ProgressEvent::AnalysisStarted {
            total_chunks: total,
            estimated_time: self.estimator.estimate(total),
        });

        let mut context = SummaryContext::default();
        let mut results = Vec::with_capacity(total);
        for chunk in &chunks {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let started = Instant::now();
            match self
                .summarizer
                .summarize(chunk, &context, progress, cancel)
                .await
            {
                Ok(done) => {
                    context = done.context;
                    self.metrics.record_chunk(true);
                    results.push(ChunkResult::Success {
                        index: chunk.index,
                        summary: done.summary,
                    });
                }
                Err(SummarizeError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(SummarizeError::Generation {
                    attempts, source, ..
                }) => {
                    tracing::warn!(
                        chunk = chunk.index + 1,
                        total,
                        error = %source,
                        "Recording failed section"
                    );
                    self.metrics.record_chunk(false);
                    results.push(ChunkResult::Failure {
                        index: chunk.index,
                        reason: format!("{source} (after {attempts} attempts)"),
                    });
                }
            }
            self.estimator.record(started.elapsed());

            let current = chunk.index + 1;
            progress.emit(ProgressEvent::ChunkFinished {
                current,
                total,
                estimated_remaining: self.estimator.estimate(total - current),
            });
        }

        tracker.enter(PipelineState::Assembling);
        if !results.iter().any(ChunkResult::is_success) {
            return Err(PipelineError::AllChunksFailed { total });
        }
        Ok(PipelineOutcome {
            summary: assemble(&results),
            pages: extracted.pages,
            skipped_pages: extracted.skipped,
            chunk_results: results,
        })
    }

    async fn extract(
        &self,
        path: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ExtractedText, PipelineError> {
        let source = self.extractor.open(path).await?;
        let pages = source.page_count();
        let mut texts = Vec::with_capacity(pages);
        let mut skipped = Vec::new();

        for index in 0..pages {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let text = source.extract_page(index).await;
            if text.trim().is_empty() {
                tracing::warn!(page = index + 1, pages, "Page yielded no text; skipping");
                skipped.push(index);
            } else {
                texts.push(text);
            }
            progress.emit(ProgressEvent::PageProcessed {
                current: index + 1,
                total: pages,
            });
            self.check_memory(&mut texts, progress).await;
        }

        Ok(ExtractedText {
            pages,
            texts,
            skipped,
        })
    }

    async fn check_memory(&self, buffer: &mut Vec<String>, progress: &ProgressSink) {
        let usage = self.memory.usage_percent();
        if usage <= self.max_memory_percent {
            return;
        }
        tracing::warn!(
            usage_percent = usage,
            threshold = self.max_memory_percent,
            "Memory pressure high; compacting before continuing"
        );
        progress.emit(ProgressEvent::Warning(format!(
            "High memory usage ({usage:.1}%), compacting before continuing"
        )));
        buffer.shrink_to_fit();
        for text in buffer.iter_mut() {
            text.shrink_to_fit();
        }
        self.memory.relieve();
        tokio::task::yield_now().await;
    }
}

struct ExtractedText {
    pages: usize,
    texts: Vec<String>,
    skipped: Vec<usize>,
}

/// Join chunk results into the final markdown document.
///
/// Failed chunks keep their section number and render an explicit unavailable marker.
pub fn assemble(results: &[ChunkResult]) -> String {
    let mut document = String::from(DOCUMENT_TITLE);
    for result in results {
        let section = result.index() + 1;
        match result {
            ChunkResult::Success { summary, .. } => {
                document.push_str(&format!("\n\n## Section {section}\n\n{summary}"));
            }
            ChunkResult::Failure { reason, .. } => {
                document.push_str(&format!(
                    "\n\n## Section {section}\n\n_Section unavailable: {reason}_"
                ));
            }
        }
    }
    document
}
