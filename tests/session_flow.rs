use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustydigest::{
    extraction::{ExtractionError, PageSource, TextExtractor},
    generation::{GenerationClient, GenerationError, GenerationRequest},
    metrics::SessionMetrics,
    processing::{
        Pipeline, RetryPolicy, Summarizer, TimeEstimator, chunking::Chunker,
        prompt::PromptTemplate, tokens::TokenCounter,
    },
    session::{
        ClientMessage, Inbound, ServerMessage, SessionDeps, SessionOutcome, SessionReport,
        SessionSettings, Stage, run_session,
    },
    system::MemoryProbe,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const RECV_DEADLINE: Duration = Duration::from_secs(5);

struct StaticPages(Vec<String>);

#[async_trait]
impl TextExtractor for StaticPages {
    async fn open(&self, path: &Path) -> Result<Box<dyn PageSource>, ExtractionError> {
        assert!(path.exists(), "upload must be staged before extraction");
        Ok(Box::new(Pages(self.0.clone())))
    }
}

struct Pages(Vec<String>);

#[async_trait]
impl PageSource for Pages {
    fn page_count(&self) -> usize {
        self.0.len()
    }

    async fn extract_page(&self, index: usize) -> String {
        self.0[index].clone()
    }
}

/// Summarizes each chunk as `Summary of <first word>`; chunks containing `fail_on` always fail.
struct KeywordBackend {
    fail_on: Option<&'static str>,
}

#[async_trait]
impl GenerationClient for KeywordBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let prompt = request
            .messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        let body = prompt.lines().last().unwrap_or_default().to_string();
        if self.fail_on.is_some_and(|word| body.contains(word)) {
            return Err(GenerationError::Failed("model crashed".into()));
        }
        let first = body.split_whitespace().next().unwrap_or_default();
        Ok(format!(
            "<context>{{\"concepts\":[\"{first}\"]}}</context><summary>Summary of {first}</summary>"
        ))
    }

    async fn probe(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}

/// Never answers.
struct StalledBackend;

#[async_trait]
impl GenerationClient for StalledBackend {
    async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
        std::future::pending::<Result<String, GenerationError>>().await
    }

    async fn probe(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}

struct CalmMemory;

impl MemoryProbe for CalmMemory {
    fn usage_percent(&self) -> f32 {
        12.0
    }
}

struct Setup {
    pages: Vec<&'static str>,
    backend: Arc<dyn GenerationClient>,
    timeout: Duration,
    heartbeat: Duration,
}

impl Setup {
    fn new(pages: &[&'static str], backend: Arc<dyn GenerationClient>) -> Self {
        Self {
            pages: pages.to_vec(),
            backend,
            timeout: Duration::from_secs(10),
            heartbeat: Duration::from_secs(5),
        }
    }

    fn deps(&self, metrics: Arc<SessionMetrics>) -> SessionDeps {
        let summarizer = Summarizer::new(
            self.backend.clone(),
            PromptTemplate::new("Section {position}/{total}\n{context}\n{chunk}"),
            "test-model",
            Duration::from_secs(30),
            RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(10),
            },
        );
        let chunker = Chunker::new(TokenCounter::whitespace(), 3).expect("chunker");
        let pipeline = Pipeline::new(
            Arc::new(StaticPages(
                self.pages.iter().map(|page| page.to_string()).collect(),
            )),
            summarizer,
            chunker,
            Arc::new(TimeEstimator::new(1.0)),
        )
        .with_memory_probe(Arc::new(CalmMemory), 90.0)
        .with_metrics(metrics.clone());

        SessionDeps {
            pipeline: Arc::new(pipeline),
            metrics,
            settings: SessionSettings {
                timeout: self.timeout,
                heartbeat_interval: self.heartbeat,
                max_upload_bytes: 1024 * 1024,
            },
        }
    }
}

struct Client {
    inbound: mpsc::Sender<Inbound>,
    outbound: mpsc::Receiver<ServerMessage>,
    session: JoinHandle<SessionReport>,
}

impl Client {
    fn connect(deps: SessionDeps) -> Self {
        let (inbound, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, outbound) = mpsc::channel(256);
        let session = tokio::spawn(run_session(deps, inbound_rx, outbound_tx));
        Self {
            inbound,
            outbound,
            session,
        }
    }

    async fn send(&self, message: ClientMessage) {
        self.inbound
            .send(Inbound::Message(message))
            .await
            .expect("session accepts input");
    }

    async fn upload(&self) {
        self.send(ClientMessage::Start {
            data: STANDARD.encode(b"%PDF-1.4 fake document"),
            is_final: Some(true),
            total: None,
        })
        .await;
    }

    async fn next(&mut self) -> Option<ServerMessage> {
        tokio::time::timeout(RECV_DEADLINE, self.outbound.recv())
            .await
            .expect("session kept talking")
    }

    /// Read every remaining message until the session closes its side.
    async fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.next().await {
            messages.push(message);
        }
        messages
    }

    async fn finish(self) -> SessionReport {
        tokio::time::timeout(RECV_DEADLINE, self.session)
            .await
            .expect("session ended")
            .expect("session task")
    }
}

fn is_ping(message: &ServerMessage) -> bool {
    matches!(message, ServerMessage::Ping { .. })
}

fn summary_of(messages: &[ServerMessage]) -> &str {
    match messages.last() {
        Some(ServerMessage::Complete { summary, .. }) => summary,
        other => panic!("expected final summary, got {other:?}"),
    }
}

fn assert_complete_status_before_summary(messages: &[ServerMessage]) {
    let [.., status, ServerMessage::Complete { .. }] = messages else {
        panic!("session must end with status and summary: {messages:?}");
    };
    match status {
        ServerMessage::Status(update) => {
            assert_eq!(update.status, Stage::Complete);
            assert_eq!(update.progress, Some(1.0));
        }
        other => panic!("expected complete status, got {other:?}"),
    }
}

#[tokio::test]
async fn two_chunk_document_yields_two_sections() {
    let metrics = Arc::new(SessionMetrics::new());
    let setup = Setup::new(
        &["Alpha beta gamma.", "Delta epsilon zeta."],
        Arc::new(KeywordBackend { fail_on: None }),
    );
    let mut client = Client::connect(setup.deps(metrics.clone()));
    client.upload().await;

    let messages = client.drain().await;
    let summary = summary_of(&messages);
    assert!(summary.starts_with("# Document Summary"));
    assert!(summary.contains("## Section 1\n\nSummary of Alpha"));
    assert!(summary.contains("## Section 2\n\nSummary of Delta"));
    assert!(!summary.contains("unavailable"));
    assert_complete_status_before_summary(&messages);

    assert!(matches!(
        messages.first(),
        Some(ServerMessage::Status(update)) if update.status == Stage::Receiving
    ));
    assert!(messages.iter().any(|message| matches!(
        message,
        ServerMessage::Status(update) if update.status == Stage::Processing
            && update.current_page == Some(2)
            && update.total_pages == Some(2)
    )));
    assert!(messages.iter().any(|message| matches!(
        message,
        ServerMessage::Status(update) if update.status == Stage::Analyzing
            && update.current_chunk == Some(2)
            && update.estimated_remaining.is_some()
    )));

    let report = client.finish().await;
    assert_eq!(report.outcome, SessionOutcome::Completed);
    let artifact = report.artifact.expect("upload was staged");
    assert!(!artifact.exists(), "staged upload must be removed");

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.sessions_started, 1);
    assert_eq!(snapshot.sessions_completed, 1);
    assert_eq!(snapshot.chunks_summarized, 2);
}

#[tokio::test]
async fn failed_middle_chunk_is_marked_and_session_completes() {
    let setup = Setup::new(
        &["Alpha beta gamma.", "Delta epsilon zeta.", "Eta theta iota."],
        Arc::new(KeywordBackend {
            fail_on: Some("Delta"),
        }),
    );
    let mut client = Client::connect(setup.deps(Arc::new(SessionMetrics::new())));
    client.upload().await;

    let messages = client.drain().await;
    let summary = summary_of(&messages);
    assert!(summary.contains("## Section 1\n\nSummary of Alpha"));
    assert!(summary.contains("## Section 2\n\n_Section unavailable: "));
    assert!(summary.contains("## Section 3\n\nSummary of Eta"));
    assert_complete_status_before_summary(&messages);
    assert!(
        !messages
            .iter()
            .any(|message| matches!(message, ServerMessage::Error { .. }))
    );

    let failed_attempts = messages
        .iter()
        .filter(|message| matches!(
            message,
            ServerMessage::Status(update) if update.current_chunk == Some(2)
                && update.attempt_status == Some("failed")
        ))
        .count();
    assert_eq!(failed_attempts, 3);

    assert_eq!(client.finish().await.outcome, SessionOutcome::Completed);
}

#[tokio::test]
async fn cancel_during_summarization_ends_promptly_and_cleans_up() {
    let metrics = Arc::new(SessionMetrics::new());
    let mut setup = Setup::new(&["Alpha beta gamma."], Arc::new(StalledBackend));
    setup.heartbeat = Duration::from_millis(500);
    let mut client = Client::connect(setup.deps(metrics.clone()));
    client.upload().await;

    loop {
        match client.next().await.expect("session still open") {
            ServerMessage::Status(update) if update.attempt_status == Some("started") => break,
            _ => continue,
        }
    }

    let cancelled_at = Instant::now();
    client.send(ClientMessage::Cancel).await;
    let messages = client.drain().await;
    let report = client.finish().await;
    let elapsed = cancelled_at.elapsed();

    assert!(
        elapsed <= setup.heartbeat + Duration::from_millis(250),
        "session took {elapsed:?} to wind down"
    );
    assert_eq!(
        messages.last(),
        Some(&ServerMessage::status(Stage::Cancelled)),
        "cancel ack must be the final message: {messages:?}"
    );
    assert_eq!(
        messages
            .iter()
            .filter(|message| **message == ServerMessage::status(Stage::Cancelled))
            .count(),
        1
    );
    assert_eq!(report.outcome, SessionOutcome::Cancelled);
    assert!(!report.artifact.expect("upload was staged").exists());
    assert_eq!(metrics.snapshot().sessions_cancelled, 1);
}

#[tokio::test]
async fn stalled_generation_keeps_pinging_until_timeout() {
    let mut setup = Setup::new(&["Alpha beta gamma."], Arc::new(StalledBackend));
    setup.timeout = Duration::from_millis(600);
    setup.heartbeat = Duration::from_millis(100);
    let mut client = Client::connect(setup.deps(Arc::new(SessionMetrics::new())));
    client.upload().await;

    let messages = client.drain().await;
    let pings = messages.iter().filter(|message| is_ping(message)).count();
    assert!(pings >= 2, "expected keep-alives while stalled: {messages:?}");

    match messages.last() {
        Some(ServerMessage::Error { error }) => {
            assert!(error.contains("timed out"), "unexpected error: {error}")
        }
        other => panic!("expected timeout error, got {other:?}"),
    }
    assert!(
        !messages
            .iter()
            .any(|message| matches!(message, ServerMessage::Complete { .. }))
    );

    let report = client.finish().await;
    assert!(matches!(report.outcome, SessionOutcome::Failed(ref reason) if reason.contains("timed out")));
    assert!(!report.artifact.expect("upload was staged").exists());
}

#[tokio::test]
async fn stalled_upload_times_out_under_the_session_deadline() {
    let mut setup = Setup::new(
        &["Alpha beta gamma."],
        Arc::new(KeywordBackend { fail_on: None }),
    );
    setup.timeout = Duration::from_millis(200);
    setup.heartbeat = Duration::from_millis(100);
    let mut client = Client::connect(setup.deps(Arc::new(SessionMetrics::new())));
    client
        .send(ClientMessage::Start {
            data: "QQ==".into(),
            is_final: None,
            total: Some(3),
        })
        .await;

    let messages = client.drain().await;
    match messages.last() {
        Some(ServerMessage::Error { error }) => {
            assert!(error.contains("timed out"), "unexpected error: {error}")
        }
        other => panic!("expected timeout error, got {other:?}"),
    }
    let pings = messages.iter().filter(|message| is_ping(message)).count();
    assert!(pings <= 3, "session outlived its deadline: {messages:?}");

    let report = client.finish().await;
    assert!(matches!(report.outcome, SessionOutcome::Failed(ref reason) if reason.contains("timed out")));
    assert!(report.artifact.is_none());
}

#[tokio::test]
async fn fragmented_upload_is_acknowledged_and_reassembled() {
    let setup = Setup::new(
        &["Alpha beta gamma."],
        Arc::new(KeywordBackend { fail_on: None }),
    );
    let mut client = Client::connect(setup.deps(Arc::new(SessionMetrics::new())));

    let encoded = STANDARD.encode(b"%PDF-1.4 a document split across frames");
    let (head, rest) = encoded.split_at(10);
    let (middle, tail) = rest.split_at(10);
    client
        .send(ClientMessage::Start {
            data: format!("data:application/pdf;base64,{head}"),
            is_final: None,
            total: Some(3),
        })
        .await;
    client
        .send(ClientMessage::Chunk {
            data: middle.to_string(),
            current: 2,
            total: 3,
            is_final: None,
        })
        .await;
    client
        .send(ClientMessage::Chunk {
            data: tail.to_string(),
            current: 3,
            total: 3,
            is_final: Some(true),
        })
        .await;

    let messages = client.drain().await;
    let acks: Vec<Option<f64>> = messages
        .iter()
        .filter_map(|message| match message {
            ServerMessage::Status(update) if update.status == Stage::Receiving => {
                Some(update.progress)
            }
            _ => None,
        })
        .collect();
    assert_eq!(acks.len(), 3);
    assert_eq!(acks[2], Some(1.0));
    assert!(summary_of(&messages).contains("## Section 1"));
}

#[tokio::test]
async fn chunk_before_start_is_rejected() {
    let setup = Setup::new(
        &["Alpha beta gamma."],
        Arc::new(KeywordBackend { fail_on: None }),
    );
    let mut client = Client::connect(setup.deps(Arc::new(SessionMetrics::new())));
    client
        .send(ClientMessage::Chunk {
            data: "QQ==".into(),
            current: 1,
            total: 2,
            is_final: None,
        })
        .await;

    let messages = client.drain().await;
    assert_eq!(
        messages,
        vec![ServerMessage::error(
            "Invalid input: Received chunk before start"
        )]
    );
    let report = client.finish().await;
    assert!(matches!(report.outcome, SessionOutcome::Failed(_)));
    assert!(report.artifact.is_none());
}

#[tokio::test]
async fn empty_upload_is_rejected_before_processing() {
    let setup = Setup::new(
        &["Alpha beta gamma."],
        Arc::new(KeywordBackend { fail_on: None }),
    );
    let mut client = Client::connect(setup.deps(Arc::new(SessionMetrics::new())));
    client
        .send(ClientMessage::Start {
            data: String::new(),
            is_final: Some(true),
            total: None,
        })
        .await;

    let messages = client.drain().await;
    assert_eq!(
        messages.last(),
        Some(&ServerMessage::error("Invalid input: Empty file received"))
    );
    assert!(
        !messages.iter().any(|message| matches!(
            message,
            ServerMessage::Status(update) if update.status == Stage::Converting
        ))
    );
}

#[tokio::test]
async fn cancel_during_upload_is_acknowledged() {
    let setup = Setup::new(
        &["Alpha beta gamma."],
        Arc::new(KeywordBackend { fail_on: None }),
    );
    let mut client = Client::connect(setup.deps(Arc::new(SessionMetrics::new())));
    client
        .send(ClientMessage::Start {
            data: "QQ==".into(),
            is_final: None,
            total: Some(4),
        })
        .await;
    client.send(ClientMessage::Cancel).await;

    let messages = client.drain().await;
    assert_eq!(messages.last(), Some(&ServerMessage::status(Stage::Cancelled)));
    assert_eq!(client.finish().await.outcome, SessionOutcome::Cancelled);
}

#[tokio::test]
async fn disconnect_during_processing_cleans_up() {
    let setup = Setup::new(&["Alpha beta gamma."], Arc::new(StalledBackend));
    let mut client = Client::connect(setup.deps(Arc::new(SessionMetrics::new())));
    client.upload().await;

    loop {
        match client.next().await.expect("session still open") {
            ServerMessage::Status(update) if update.attempt_status == Some("started") => break,
            _ => continue,
        }
    }
    client
        .inbound
        .send(Inbound::Closed)
        .await
        .expect("session accepts input");

    let report = client.finish().await;
    assert_eq!(report.outcome, SessionOutcome::Disconnected);
    assert!(!report.artifact.expect("upload was staged").exists());
}
