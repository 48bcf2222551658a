#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ai_scoring_server::dispatch::{DispatchPolicy, Dispatcher};
use ai_scoring_server::http_server::{self, AppState};
use ai_scoring_server::scorer::{self, HttpScorer, HttpScorerConfig, MockScorer, WalletScorer};
use ai_scoring_server::stats::StatsRegister;
use ai_scoring_server::stream::{self, StreamConfig};
use ai_scoring_server::transport::{ChannelConsumer, LoggingProducer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScorerMode {
    /// Deterministic in-process scorer.
    Mock,
    /// Remote model service over HTTP.
    Http,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "ai-scoring-server", version, about = "Wallet scoring dispatch node")]
struct Settings {
    /// Address for the HTTP surface.
    #[arg(long, env = "SCORING_LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    listen_addr: String,

    /// Scoring collaborator implementation.
    #[arg(long, value_enum, env = "SCORING_SCORER_MODE", default_value_t = ScorerMode::Mock)]
    scorer_mode: ScorerMode,

    /// Base URL of the remote model service (http mode).
    #[arg(long, env = "SCORING_SCORER_URL", default_value = scorer::DEFAULT_SCORER_URL)]
    scorer_url: String,

    /// Per-request timeout for the remote model service, in milliseconds.
    #[arg(
        long,
        env = "SCORING_SCORER_REQUEST_TIMEOUT_MS",
        default_value_t = scorer::DEFAULT_REQUEST_TIMEOUT_MS
    )]
    scorer_request_timeout_ms: u64,

    /// Upper bound on one scorer invocation, in milliseconds. 0 disables.
    #[arg(long, env = "SCORING_SCORER_TIMEOUT_MS", default_value_t = 30_000)]
    scorer_timeout_ms: u64,

    /// Run the stream worker alongside the HTTP surface.
    #[arg(
        long,
        env = "SCORING_STREAM_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    stream_enabled: bool,

    /// Inbound topic label.
    #[arg(long, env = "SCORING_INPUT_TOPIC", default_value = "wallet-score-requests")]
    input_topic: String,

    /// Outbound topic for success envelopes.
    #[arg(long, env = "SCORING_SUCCESS_TOPIC", default_value = stream::DEFAULT_SUCCESS_TOPIC)]
    success_topic: String,

    /// Outbound topic for failure envelopes.
    #[arg(long, env = "SCORING_FAILURE_TOPIC", default_value = stream::DEFAULT_FAILURE_TOPIC)]
    failure_topic: String,

    /// Inbound poll timeout, in milliseconds.
    #[arg(
        long,
        env = "SCORING_POLL_TIMEOUT_MS",
        default_value_t = stream::DEFAULT_POLL_TIMEOUT_MS
    )]
    poll_timeout_ms: u64,

    /// Capacity of the in-process inbound channel.
    #[arg(long, env = "SCORING_CHANNEL_CAPACITY", default_value_t = 1024)]
    channel_capacity: usize,
}

#[derive(Debug, Error)]
enum NodeError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "node terminated with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), NodeError> {
    let settings = Settings::parse();
    init_logging();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        scorer_mode = ?settings.scorer_mode,
        stream_enabled = settings.stream_enabled,
        "starting ai-scoring-server"
    );

    let scorer: Arc<dyn WalletScorer> = match settings.scorer_mode {
        ScorerMode::Mock => Arc::new(MockScorer),
        ScorerMode::Http => {
            let config = HttpScorerConfig {
                base_url: settings.scorer_url.clone(),
                request_timeout_ms: settings.scorer_request_timeout_ms,
            };
            Arc::new(HttpScorer::new(config).map_err(|e| NodeError::Config(e.to_string()))?)
        }
    };

    let stats = Arc::new(StatsRegister::new());
    let scorer_timeout =
        (settings.scorer_timeout_ms > 0).then(|| Duration::from_millis(settings.scorer_timeout_ms));

    let http_dispatcher = Arc::new(Dispatcher::new(
        scorer.clone(),
        stats.clone(),
        DispatchPolicy::http(),
        scorer_timeout,
    ));

    // The inbound sender stays alive for the whole run so the worker keeps
    // polling; a broker deployment swaps the channel pair for its own
    // MessageConsumer/MessageProducer implementations.
    let mut stream_worker = None;
    let mut _inbound: Option<mpsc::Sender<Vec<u8>>> = None;
    if settings.stream_enabled {
        let stream_dispatcher = Arc::new(Dispatcher::new(
            scorer.clone(),
            stats.clone(),
            DispatchPolicy::stream(),
            scorer_timeout,
        ));
        let (inbound_tx, consumer) = ChannelConsumer::bounded(settings.channel_capacity);
        let config = StreamConfig {
            success_topic: settings.success_topic.clone(),
            failure_topic: settings.failure_topic.clone(),
            poll_timeout_ms: settings.poll_timeout_ms,
        };
        info!(input_topic = %settings.input_topic, "stream surface enabled");
        stream_worker = Some(stream::spawn(
            config,
            stream_dispatcher,
            consumer,
            Arc::new(LoggingProducer),
        ));
        _inbound = Some(inbound_tx);
    }

    let state = AppState::new(http_dispatcher, stats);
    let app = http_server::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr).await?;
    info!(addr = %settings.listen_addr, "http surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(worker) = stream_worker {
        let snapshot = worker.snapshot();
        info!(
            consumed = snapshot.consumed,
            transport_errors = snapshot.transport_errors,
            "stopping stream worker"
        );
        worker.shutdown().await;
    }
    info!("shutdown complete");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
