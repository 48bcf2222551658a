#![forbid(unsafe_code)]

//! The dispatch operation shared by both ingress surfaces.
//!
//! One dispatch = invoke the scorer, classify the outcome, build exactly one
//! envelope, update the injected stats register. No fault crosses this
//! boundary: scorer faults, preprocessing faults, timeouts, and payload parse
//! errors are all downgraded to a failure envelope.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::error;

use crate::envelope::{filter_features, ResultEnvelope};
use crate::payload::WalletPayload;
use crate::scorer::{ScoreOutcome, ScorerError, WalletScorer};
use crate::stats::StatsRegister;

/// How a single dispatch resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The model produced a score.
    Success,
    /// The model declined the payload. Expected, not a system fault.
    ModelError,
    /// Any other fault during scoring, preprocessing, or payload parsing.
    UnhandledError,
}

impl Classification {
    /// `ModelError` and `UnhandledError` both count as failures.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ModelError => "model_error",
            Self::UnhandledError => "unhandled_error",
        }
    }
}

/// Per-surface envelope policy.
///
/// The surfaces differ in exactly two knobs, both preserved from the
/// original wire contract: the HTTP surface strips the reserved feature keys
/// from success envelopes and reports real elapsed time on unhandled faults;
/// the stream surface passes features through untouched and reports
/// `processing_time_ms: 0` on unhandled faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Strip `score_breakdown`/`user_tags` from success envelopes.
    pub filter_features: bool,
    /// Report real elapsed time on the unhandled-fault path; `false` reports 0.
    pub clock_unhandled_faults: bool,
}

impl DispatchPolicy {
    pub fn http() -> Self {
        Self {
            filter_features: true,
            clock_unhandled_faults: true,
        }
    }

    pub fn stream() -> Self {
        Self {
            filter_features: false,
            clock_unhandled_faults: false,
        }
    }
}

/// One dispatched envelope plus its classification.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub envelope: ResultEnvelope,
    pub classification: Classification,
}

/// Runs the dispatch operation against an injected scorer and stats register.
pub struct Dispatcher {
    scorer: Arc<dyn WalletScorer>,
    stats: Arc<StatsRegister>,
    policy: DispatchPolicy,
    scorer_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        scorer: Arc<dyn WalletScorer>,
        stats: Arc<StatsRegister>,
        policy: DispatchPolicy,
        scorer_timeout: Option<Duration>,
    ) -> Self {
        Self {
            scorer,
            stats,
            policy,
            scorer_timeout,
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Dispatch one payload and record the result. Always returns an
    /// envelope; never a fault.
    pub async fn dispatch(&self, payload: &WalletPayload) -> Dispatched {
        let started = Instant::now();
        let wallet = payload.wallet_address();

        let dispatched = match self.invoke_scorer(payload).await {
            Err(fault) => self.unhandled(wallet, &fault, started),
            Ok(ScoreOutcome::Declined { reason }) => Dispatched {
                envelope: ResultEnvelope::declined(wallet, &reason, elapsed_ms(started)),
                classification: Classification::ModelError,
            },
            Ok(ScoreOutcome::Scored { score, features }) => {
                // The preprocessing pass runs only on scored outcomes and
                // only for its row count.
                match self.scorer.preprocess(payload).await {
                    Err(fault) => self.unhandled(wallet, &fault, started),
                    Ok(rows) => {
                        let mut features = features;
                        if self.policy.filter_features {
                            filter_features(&mut features);
                        }
                        Dispatched {
                            envelope: ResultEnvelope::success(
                                wallet,
                                score,
                                rows.len() as u64,
                                features,
                                elapsed_ms(started),
                            ),
                            classification: Classification::Success,
                        }
                    }
                }
            }
        };

        self.record(&dispatched);
        dispatched
    }

    /// Dispatch a raw message body. A parse fault follows the unhandled
    /// path with whatever could be salvaged; the wallet address defaults to
    /// the empty string.
    pub async fn dispatch_raw(&self, raw: &[u8]) -> Dispatched {
        match serde_json::from_slice::<WalletPayload>(raw) {
            Ok(payload) => self.dispatch(&payload).await,
            Err(err) => {
                let fault = ScorerError::Internal(format!("invalid payload: {err}"));
                let dispatched = self.unhandled("", &fault, Instant::now());
                self.record(&dispatched);
                dispatched
            }
        }
    }

    async fn invoke_scorer(&self, payload: &WalletPayload) -> Result<ScoreOutcome, ScorerError> {
        match self.scorer_timeout {
            Some(limit) => match timeout(limit, self.scorer.score(payload)).await {
                Ok(result) => result,
                Err(_) => Err(ScorerError::Timeout(limit.as_millis() as u64)),
            },
            None => self.scorer.score(payload).await,
        }
    }

    fn unhandled(&self, wallet: &str, fault: &ScorerError, started: Instant) -> Dispatched {
        error!(wallet = %wallet, error = %fault, "unhandled dispatch fault");
        let elapsed = if self.policy.clock_unhandled_faults {
            elapsed_ms(started)
        } else {
            0
        };
        Dispatched {
            envelope: ResultEnvelope::unhandled(wallet, &fault.to_string(), elapsed),
            classification: Classification::UnhandledError,
        }
    }

    fn record(&self, dispatched: &Dispatched) {
        self.stats.record(
            dispatched.classification,
            dispatched.envelope.processing_time_ms(),
        );
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
