//! HTTP surface for Rusty Digest.
//!
//! This module exposes a compact Axum router:
//!
//! - `GET /ws` – Upgrade to a WebSocket and run one document session (upload, progress,
//!   heartbeat, summary).
//! - `GET /health` – Memory usage, hostname, active configuration and whether the generation
//!   backend is reachable. Read-only.
//! - `GET /metrics` – Session and chunk counters.

use crate::config::get_config;
use crate::generation::GenerationClient;
use crate::metrics::MetricsSnapshot;
use crate::session::{SessionDeps, socket::serve_socket};
use crate::system::{MemoryProbe, hostname};
use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderValue, Method},
    response::Response,
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handles used by every request.
#[derive(Clone)]
pub struct AppState {
    /// Collaborators handed to each WebSocket session.
    pub sessions: SessionDeps,
    /// Generation backend, probed by `/health`.
    pub generation: Arc<dyn GenerationClient>,
    /// Memory sampler reported by `/health`.
    pub memory: Arc<dyn MemoryProbe>,
    /// Browser origins allowed to connect.
    pub cors_origins: Vec<String>,
}

/// Build the HTTP router.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    Router::new()
        .route("/ws", get(open_session))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);
    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// Upgrade the connection and hand it to a new session.
async fn open_session(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let max_payload = state
        .sessions
        .settings
        .max_upload_bytes
        .saturating_mul(4)
        / 3
        + 1024;
    let deps = state.sessions.clone();
    upgrade
        .max_message_size(max_payload)
        .max_frame_size(max_payload)
        .on_upgrade(move |socket| async move {
            let report = serve_socket(socket, deps).await;
            tracing::debug!(session = %report.id, outcome = ?report.outcome, "WebSocket closed");
        })
}

/// Response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Memory usage in percent.
    memory: f32,
    hostname: String,
    checked_at: String,
    config: ConfigSummary,
    ollama: &'static str,
    metrics: MetricsSnapshot,
}

#[derive(Serialize)]
struct ConfigSummary {
    ollama_url: String,
    model: String,
    chunk_size: usize,
    token_encoding: String,
    generation_timeout_secs: u64,
    session_timeout_secs: u64,
    heartbeat_interval_secs: u64,
    max_retries: u32,
    max_memory_percent: f32,
}

/// Report host and backend health. Never fails; an unreachable backend is reported as `error`.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = get_config();
    let ollama = match state.generation.probe().await {
        Ok(()) => "connected",
        Err(error) => {
            tracing::warn!(error = %error, "Generation backend health probe failed");
            "error"
        }
    };
    let checked_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    Json(HealthResponse {
        status: "healthy",
        memory: (state.memory.usage_percent() * 10.0).round() / 10.0,
        hostname: hostname(),
        checked_at,
        config: ConfigSummary {
            ollama_url: config.ollama_url.clone(),
            model: config.summary_model.clone(),
            chunk_size: config.chunk_size,
            token_encoding: config.token_encoding.clone(),
            generation_timeout_secs: config.generation_timeout_secs,
            session_timeout_secs: config.session_timeout_secs,
            heartbeat_interval_secs: config.heartbeat_interval_secs,
            max_retries: config.max_retries,
            max_memory_percent: config.max_memory_percent,
        },
        ollama,
        metrics: state.sessions.metrics.snapshot(),
    })
}

/// Return session and chunk counters.
async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.sessions.metrics.snapshot())
}

#[cfg(test)]
mod tests {
    use super::{AppState, create_router};
    use crate::config::{CONFIG, Config};
    use crate::extraction::PdfTextExtractor;
    use crate::generation::{GenerationClient, GenerationError, GenerationRequest};
    use crate::metrics::SessionMetrics;
    use crate::processing::{
        Pipeline, RetryPolicy, Summarizer, TimeEstimator, chunking::Chunker,
        prompt::PromptTemplate, tokens::TokenCounter,
    };
    use crate::session::{SessionDeps, SessionSettings};
    use crate::system::MemoryProbe;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use std::sync::{Arc, Once};
    use std::time::Duration;
    use tower::ServiceExt;

    struct StubBackend {
        reachable: bool,
    }

    #[async_trait]
    impl GenerationClient for StubBackend {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
            Ok("<summary>stub</summary>".into())
        }

        async fn probe(&self) -> Result<(), GenerationError> {
            if self.reachable {
                Ok(())
            } else {
                Err(GenerationError::Unavailable("connection refused".into()))
            }
        }
    }

    struct FixedMemory;

    impl MemoryProbe for FixedMemory {
        fn usage_percent(&self) -> f32 {
            42.26
        }
    }

    fn ensure_test_config() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = CONFIG.set(Config {
                summary_model: "test-model".into(),
                chunk_size: 512,
                ..Config::default()
            });
        });
    }

    fn state(reachable: bool, metrics: Arc<SessionMetrics>) -> AppState {
        let backend: Arc<dyn GenerationClient> = Arc::new(StubBackend { reachable });
        let summarizer = Summarizer::new(
            backend.clone(),
            PromptTemplate::default(),
            "test-model",
            Duration::from_secs(1),
            RetryPolicy::default(),
        );
        let chunker = Chunker::new(TokenCounter::whitespace(), 512).expect("chunker");
        let pipeline = Pipeline::new(
            Arc::new(PdfTextExtractor::new()),
            summarizer,
            chunker,
            Arc::new(TimeEstimator::new(30.0)),
        )
        .with_metrics(metrics.clone());

        AppState {
            sessions: SessionDeps {
                pipeline: Arc::new(pipeline),
                metrics,
                settings: SessionSettings::from_config(&Config::default()),
            },
            generation: backend,
            memory: Arc::new(FixedMemory),
            cors_origins: vec!["http://localhost:5173".into()],
        }
    }

    async fn get_json(app: axum::Router, uri: &str) -> serde_json::Value {
        let response = app
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    #[tokio::test]
    async fn health_reports_connected_backend_and_config() {
        ensure_test_config();
        let app = create_router(state(true, Arc::new(SessionMetrics::new())));
        let json = get_json(app, "/health").await;

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["ollama"], "connected");
        assert_eq!(json["config"]["model"], "test-model");
        assert_eq!(json["config"]["chunk_size"], 512);
        assert!((json["memory"].as_f64().expect("memory") - 42.3).abs() < 0.01);
        assert!(!json["hostname"].as_str().expect("hostname").is_empty());
        assert!(json["checked_at"].as_str().expect("timestamp").contains('T'));
        assert_eq!(json["metrics"]["sessions_started"], 0);
    }

    #[tokio::test]
    async fn health_reports_unreachable_backend_as_error() {
        ensure_test_config();
        let app = create_router(state(false, Arc::new(SessionMetrics::new())));
        let json = get_json(app, "/health").await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["ollama"], "error");
    }

    #[tokio::test]
    async fn metrics_route_returns_counters() {
        let metrics = Arc::new(SessionMetrics::new());
        metrics.record_session_started();
        metrics.record_session_completed();
        metrics.record_chunk(true);
        metrics.record_chunk(false);
        let app = create_router(state(true, metrics));
        let json = get_json(app, "/metrics").await;

        assert_eq!(json["sessions_started"], 1);
        assert_eq!(json["sessions_completed"], 1);
        assert_eq!(json["chunks_summarized"], 1);
        assert_eq!(json["chunks_failed"], 1);
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let app = create_router(state(true, Arc::new(SessionMetrics::new())));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|value| value.to_str().ok()),
            Some("http://localhost:5173")
        );
    }

    #[tokio::test]
    async fn websocket_route_requires_upgrade() {
        let app = create_router(state(true, Arc::new(SessionMetrics::new())));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert!(response.status().is_client_error());
    }
}
