#![forbid(unsafe_code)]

//! Scoring collaborator contract and adapters.
//!
//! Dispatch treats the scoring computation as an opaque collaborator behind
//! [`WalletScorer`]. Two adapters ship with the node: a deterministic
//! [`MockScorer`] and an [`HttpScorer`] for a remote model service. The
//! remote service's legacy wire shape (a feature map carrying a truthy
//! `error` string) is translated into the tagged [`ScoreOutcome`] here, at
//! the boundary, so the rest of the pipeline never inspects feature maps for
//! sentinel fields.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::payload::WalletPayload;

pub const DEFAULT_SCORER_URL: &str = "http://127.0.0.1:9000";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Outcome of one scoring pass, decided by the collaborator itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// The model produced a score and a JSON-safe feature map.
    Scored {
        score: f64,
        features: Map<String, Value>,
    },
    /// The model declined the wallet. Expected, not a system fault.
    Declined { reason: String },
}

/// Faults raised by a scoring backend.
///
/// A model-declared decline is not a fault; it is reported through
/// [`ScoreOutcome::Declined`].
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("invalid scorer config: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("scorer returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("scoring timed out after {0}ms")]
    Timeout(u64),
    #[error("{0}")]
    Internal(String),
}

/// Scoring collaborator contract.
///
/// Implementations must return JSON-primitive-safe feature values
/// (`serde_json::Value`); dispatch serializes them as-is with no further
/// coercion. Both operations are stateless from this layer's perspective.
#[async_trait]
pub trait WalletScorer: Send + Sync {
    /// Score one wallet payload.
    async fn score(&self, payload: &WalletPayload) -> Result<ScoreOutcome, ScorerError>;

    /// Preprocess the payload into scorable transaction rows. Dispatch uses
    /// only the row count.
    async fn preprocess(&self, payload: &WalletPayload) -> Result<Vec<Value>, ScorerError>;
}

/// Deterministic in-process scorer, the `--scorer-mode mock` default.
///
/// Declines payloads without a non-empty `transactions` array; otherwise
/// derives a stable score from the wallet address and transaction count. The
/// feature map includes `score_breakdown` and `user_tags` so surface-level
/// feature filtering is observable end to end.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockScorer;

#[async_trait]
impl WalletScorer for MockScorer {
    async fn score(&self, payload: &WalletPayload) -> Result<ScoreOutcome, ScorerError> {
        let rows = transaction_rows(payload);
        if rows.is_empty() {
            return Ok(ScoreOutcome::Declined {
                reason: "no transactions".to_string(),
            });
        }

        let seed: u64 = payload.wallet_address().bytes().map(u64::from).sum();
        let activity = (seed % 500) as f64 / 100.0;
        let volume = rows.len() as f64 / 10.0;
        let score = activity + volume;

        let mut features = Map::new();
        features.insert("total_transactions".to_string(), Value::from(rows.len()));
        features.insert(
            "score_breakdown".to_string(),
            json!({"activity": activity, "volume": volume}),
        );
        features.insert("user_tags".to_string(), json!(["mock"]));
        Ok(ScoreOutcome::Scored { score, features })
    }

    async fn preprocess(&self, payload: &WalletPayload) -> Result<Vec<Value>, ScorerError> {
        Ok(transaction_rows(payload))
    }
}

fn transaction_rows(payload: &WalletPayload) -> Vec<Value> {
    payload
        .0
        .get("transactions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// HTTP scorer adapter configuration.
#[derive(Debug, Clone)]
pub struct HttpScorerConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for HttpScorerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SCORER_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Remote model service adapter.
///
/// `POST {base}/score` returns `{score, features}`; a non-empty string in
/// `features.error` marks the result as declined. `POST {base}/preprocess`
/// returns `{rows: [...]}`.
#[derive(Debug, Clone)]
pub struct HttpScorer {
    config: HttpScorerConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
    #[serde(default)]
    features: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct PreprocessResponse {
    #[serde(default)]
    rows: Vec<Value>,
}

impl HttpScorer {
    pub fn new(config: HttpScorerConfig) -> Result<Self, ScorerError> {
        if config.base_url.trim().is_empty() {
            return Err(ScorerError::Config("scorer base URL is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ScorerError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    async fn post_json<T>(&self, path: &str, payload: &WalletPayload) -> Result<T, ScorerError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(payload)
            .send()
            .await
            .map_err(|e| ScorerError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScorerError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(ScorerError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| ScorerError::Decode(e.to_string()))
    }
}

#[async_trait]
impl WalletScorer for HttpScorer {
    async fn score(&self, payload: &WalletPayload) -> Result<ScoreOutcome, ScorerError> {
        let response: ScoreResponse = self.post_json("/score", payload).await?;
        let declined = response
            .features
            .get("error")
            .and_then(Value::as_str)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);
        match declined {
            Some(reason) => Ok(ScoreOutcome::Declined { reason }),
            None => Ok(ScoreOutcome::Scored {
                score: response.score,
                features: response.features,
            }),
        }
    }

    async fn preprocess(&self, payload: &WalletPayload) -> Result<Vec<Value>, ScorerError> {
        let response: PreprocessResponse = self.post_json("/preprocess", payload).await?;
        Ok(response.rows)
    }
}
