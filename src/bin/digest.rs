use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rustydigest::{
    config::Config,
    extraction::PdfTextExtractor,
    generation::OllamaClient,
    logging::{self, LogTarget},
    metrics::SessionMetrics,
    processing::{AttemptPhase, Pipeline, ProgressEvent, ProgressSink, TimeEstimator},
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "digest",
    about = "Summarize a PDF with the Rusty Digest pipeline"
)]
struct Cli {
    /// PDF document to summarize.
    pdf: PathBuf,
    /// Write the summary to this file instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Override SUMMARY_MODEL.
    #[arg(long)]
    model: Option<String>,
    /// Override CHUNK_SIZE (tokens per chunk).
    #[arg(long)]
    chunk_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing_for(LogTarget::Cli);
    dotenvy::dotenv().ok();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(model) = cli.model {
        config.summary_model = model;
    }
    if let Some(chunk_size) = cli.chunk_size {
        if chunk_size == 0 {
            bail!("--chunk-size must be greater than zero");
        }
        config.chunk_size = chunk_size;
    }

    let client = OllamaClient::new(
        config.ollama_url.clone(),
        config.generation_timeout(),
        config.health_check_timeout(),
    )?;
    let pipeline = Pipeline::from_config(
        &config,
        Arc::new(PdfTextExtractor::new()),
        Arc::new(client),
        Arc::new(TimeEstimator::new(config.default_chunk_seconds)),
        Arc::new(SessionMetrics::new()),
    )
    .await?;

    let (sink, mut events) = ProgressSink::channel();
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = describe(&event) {
                eprintln!("{line}");
            }
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; cancelling");
            interrupt.cancel();
        }
    });

    let result = pipeline.run(&cli.pdf, &sink, &cancel).await;
    drop(sink);
    let _ = reporter.await;
    let outcome = result.with_context(|| format!("Failed to summarize {}", cli.pdf.display()))?;

    if outcome.failed_chunks() > 0 {
        eprintln!(
            "{} of {} section(s) could not be summarized",
            outcome.failed_chunks(),
            outcome.chunk_results.len()
        );
    }
    match cli.output {
        Some(path) => {
            std::fs::write(&path, &outcome.summary)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Summary written to {}", path.display());
        }
        None => println!("{}", outcome.summary),
    }
    Ok(())
}

fn describe(event: &ProgressEvent) -> Option<String> {
    let line = match event {
        ProgressEvent::Converting => "Opening document".to_string(),
        ProgressEvent::PageProcessed { current, total } => format!("Page {current}/{total}"),
        ProgressEvent::AnalysisStarted {
            total_chunks,
            estimated_time,
        } => format!("Summarizing {total_chunks} section(s), about {estimated_time}"),
        ProgressEvent::ChunkAttempt {
            index,
            total,
            attempt,
            phase: AttemptPhase::Failed,
            ..
        } => format!("Section {}/{total}: attempt {attempt} failed", index + 1),
        ProgressEvent::ChunkAttempt { .. } => return None,
        ProgressEvent::ChunkFinished {
            current,
            total,
            estimated_remaining,
        } => format!("Section {current}/{total} done, {estimated_remaining} remaining"),
        ProgressEvent::Warning(warning) => format!("warning: {warning}"),
    };
    Some(line)
}
