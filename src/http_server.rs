#![forbid(unsafe_code)]

//! HTTP ingress surface.
//!
//! `POST /score` runs the dispatch operation inline and returns the envelope
//! as the response body: 200 for scored and model-declined results, 500 for
//! unhandled faults. The read-only endpoints (`/`, `/health`, `/stats`,
//! `/metrics`) expose service identity and the shared counters.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, Gauge, IntGauge, Registry, TextEncoder};
use serde::Serialize;
use tracing::error;

use crate::dispatch::{Classification, Dispatcher};
use crate::payload::WalletPayload;
use crate::stats::StatsRegister;

pub const SERVICE_NAME: &str = "ai-scoring-server";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    stats: Arc<StatsRegister>,
    metrics: Metrics,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, stats: Arc<StatsRegister>) -> Self {
        Self {
            dispatcher,
            stats,
            metrics: Metrics::new(),
        }
    }
}

/// Prometheus gauges over the stats register, refreshed at scrape time.
/// Owned registry; nothing is registered globally.
#[derive(Clone)]
struct Metrics {
    registry: Registry,
    processed: IntGauge,
    success: IntGauge,
    failure: IntGauge,
    last_ms: IntGauge,
    uptime_seconds: Gauge,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();
        let processed = IntGauge::new("scoring_processed", "Dispatches processed").expect("gauge");
        let success = IntGauge::new("scoring_success", "Successful dispatches").expect("gauge");
        let failure = IntGauge::new("scoring_failure", "Failed dispatches").expect("gauge");
        let last_ms =
            IntGauge::new("scoring_last_processing_ms", "Latency of the most recent dispatch")
                .expect("gauge");
        let uptime_seconds =
            Gauge::new("scoring_uptime_seconds", "Seconds since process start").expect("gauge");

        for gauge in [&processed, &success, &failure, &last_ms] {
            registry
                .register(Box::new(gauge.clone()))
                .expect("register gauge");
        }
        registry
            .register(Box::new(uptime_seconds.clone()))
            .expect("register gauge");

        Self {
            registry,
            processed,
            success,
            failure,
            last_ms,
            uptime_seconds,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(identity))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/score", post(score))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ServiceIdentity {
    service: &'static str,
    version: &'static str,
    status: &'static str,
}

async fn identity() -> Json<ServiceIdentity> {
    Json(ServiceIdentity {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        status: "ok",
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: f64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        uptime_seconds: state.stats.uptime_seconds(),
    })
}

async fn stats(State(state): State<AppState>) -> Response {
    Json(state.stats.snapshot()).into_response()
}

async fn score(State(state): State<AppState>, Json(payload): Json<WalletPayload>) -> Response {
    let dispatched = state.dispatcher.dispatch(&payload).await;
    let status = status_for(dispatched.classification);
    (status, Json(dispatched.envelope)).into_response()
}

/// A model-declared decline is not a server error; an unhandled fault is.
fn status_for(classification: Classification) -> StatusCode {
    match classification {
        Classification::Success | Classification::ModelError => StatusCode::OK,
        Classification::UnhandledError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    let snap = state.stats.snapshot();
    state.metrics.processed.set(snap.processed as i64);
    state.metrics.success.set(snap.success as i64);
    state.metrics.failure.set(snap.failure as i64);
    state.metrics.last_ms.set(snap.last_ms as i64);
    state.metrics.uptime_seconds.set(snap.uptime_seconds);

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
        error!(error = %err, "metrics encoding failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
