use rustydigest::{
    api::{self, AppState},
    config, extraction,
    generation::{GenerationClient, OllamaClient},
    logging,
    metrics::SessionMetrics,
    processing::{Pipeline, TimeEstimator},
    session::{SessionDeps, SessionSettings},
    system::{self, MemoryProbe, SystemMemoryProbe},
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let generation: Arc<dyn GenerationClient> = Arc::new(OllamaClient::new(
        config.ollama_url.clone(),
        config.generation_timeout(),
        config.health_check_timeout(),
    )?);
    log_diagnostics(generation.as_ref(), &config.ollama_url).await;

    let metrics = Arc::new(SessionMetrics::new());
    let estimator = Arc::new(TimeEstimator::new(config.default_chunk_seconds));
    let pipeline = Pipeline::from_config(
        config,
        Arc::new(extraction::PdfTextExtractor::new()),
        generation.clone(),
        estimator,
        metrics.clone(),
    )
    .await?;

    let app = api::create_router(AppState {
        sessions: SessionDeps {
            pipeline: Arc::new(pipeline),
            metrics,
            settings: SessionSettings::from_config(config),
        },
        generation,
        memory: Arc::new(SystemMemoryProbe::new()),
        cors_origins: config.cors_origins.clone(),
    });

    let (listener, port) = bind_listener().await?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn log_diagnostics(generation: &dyn GenerationClient, ollama_url: &str) {
    let memory = SystemMemoryProbe::new().usage_percent();
    tracing::info!(
        hostname = %system::hostname(),
        memory_percent = memory,
        "Starting Rusty Digest"
    );
    match generation.probe().await {
        Ok(()) => tracing::info!(url = ollama_url, "Generation backend reachable"),
        Err(error) => tracing::warn!(
            url = ollama_url,
            error = %error,
            "Generation backend unreachable; sessions will fail until it is available"
        ),
    }
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8000..=8099;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8000-8099",
    ))
}
