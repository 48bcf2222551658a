#![forbid(unsafe_code)]

//! The stream dispatch loop.
//!
//! A single worker task polls the inbound transport, runs the shared
//! dispatch operation on each message, and publishes the resulting envelope
//! to the success or failure topic by classification. Per-message failures
//! never stop the loop; only a cancellation signal or a fatal inbound
//! transport fault does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::transport::{MessageConsumer, MessageProducer};

pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_SUCCESS_TOPIC: &str = "wallet-scores-success";
pub const DEFAULT_FAILURE_TOPIC: &str = "wallet-scores-failure";

/// Stream worker configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub success_topic: String,
    pub failure_topic: String,
    /// Upper bound on one inbound poll. A poll that returns nothing within
    /// this window simply polls again.
    pub poll_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            success_topic: DEFAULT_SUCCESS_TOPIC.to_string(),
            failure_topic: DEFAULT_FAILURE_TOPIC.to_string(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Default)]
struct StreamState {
    consumed: AtomicU64,
    published_success: AtomicU64,
    published_failure: AtomicU64,
    transport_errors: AtomicU64,
}

/// Point-in-time view of the worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSnapshot {
    pub consumed: u64,
    pub published_success: u64,
    pub published_failure: u64,
    pub transport_errors: u64,
}

/// Handle to a running stream worker.
pub struct StreamHandle {
    cancel: watch::Sender<bool>,
    state: Arc<StreamState>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            consumed: self.state.consumed.load(Ordering::Relaxed),
            published_success: self.state.published_success.load(Ordering::Relaxed),
            published_failure: self.state.published_failure.load(Ordering::Relaxed),
            transport_errors: self.state.transport_errors.load(Ordering::Relaxed),
        }
    }

    /// True once the worker loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the worker to exit.
    pub async fn shutdown(self) {
        let _ = self.cancel.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the stream worker on the current runtime.
pub fn spawn<C>(
    config: StreamConfig,
    dispatcher: Arc<Dispatcher>,
    consumer: C,
    producer: Arc<dyn MessageProducer>,
) -> StreamHandle
where
    C: MessageConsumer + 'static,
{
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let state = Arc::new(StreamState::default());
    let task = tokio::spawn(run_loop(
        config,
        dispatcher,
        consumer,
        producer,
        state.clone(),
        cancel_rx,
    ));
    StreamHandle {
        cancel: cancel_tx,
        state,
        task,
    }
}

async fn run_loop<C>(
    config: StreamConfig,
    dispatcher: Arc<Dispatcher>,
    mut consumer: C,
    producer: Arc<dyn MessageProducer>,
    state: Arc<StreamState>,
    mut cancel_rx: watch::Receiver<bool>,
) where
    C: MessageConsumer,
{
    let poll_timeout = Duration::from_millis(config.poll_timeout_ms);
    info!(
        success_topic = %config.success_topic,
        failure_topic = %config.failure_topic,
        poll_timeout_ms = config.poll_timeout_ms,
        "stream worker started"
    );

    loop {
        let polled = tokio::select! {
            changed = cancel_rx.changed() => {
                // Err means the handle is gone; stop either way.
                match changed {
                    Ok(()) if !*cancel_rx.borrow() => continue,
                    _ => {
                        info!("stream worker shutting down");
                        break;
                    }
                }
            }
            polled = consumer.poll(poll_timeout) => polled,
        };

        let raw = match polled {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(fault) if fault.is_fatal() => {
                error!(error = %fault, "inbound transport failed, stream worker stopping");
                break;
            }
            Err(fault) => {
                warn!(error = %fault, "inbound delivery fault");
                state.transport_errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        state.consumed.fetch_add(1, Ordering::Relaxed);
        let dispatched = dispatcher.dispatch_raw(&raw).await;
        let topic = if dispatched.classification.is_failure() {
            &config.failure_topic
        } else {
            &config.success_topic
        };

        let message = match serde_json::to_vec(&dispatched.envelope) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "envelope serialization failed");
                state.transport_errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        match producer.publish(topic, &message).await {
            Ok(()) => {
                if dispatched.classification.is_failure() {
                    state.published_failure.fetch_add(1, Ordering::Relaxed);
                } else {
                    state.published_success.fetch_add(1, Ordering::Relaxed);
                }
                debug!(
                    topic = %topic,
                    wallet = %dispatched.envelope.wallet_address(),
                    classification = dispatched.classification.as_str(),
                    "envelope published"
                );
            }
            Err(fault) => {
                warn!(topic = %topic, error = %fault, "publish failed");
                state.transport_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // The transport handles are owned by this task; every exit path drops
    // them here.
    info!("stream worker stopped");
}
