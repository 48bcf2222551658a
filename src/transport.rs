#![forbid(unsafe_code)]

//! Stream transport seams.
//!
//! The stream loop is written against two small traits so the broker binding
//! stays outside this crate. The shipped implementations are bounded
//! in-process channels (tests, single-process runs) and a logging producer
//! that records deliveries instead of sending them anywhere.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info;

/// Inbound/outbound channel faults for the stream surface.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying channel is gone.
    #[error("transport closed: {0}")]
    Closed(String),
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl TransportError {
    /// True when the transport itself is gone, as opposed to one failed
    /// delivery. The loop stops polling only on fatal inbound faults.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Source of inbound payload messages.
#[async_trait]
pub trait MessageConsumer: Send {
    /// Wait up to `wait` for the next message. `Ok(None)` means the timeout
    /// elapsed with nothing to consume; it is not an error.
    async fn poll(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Sink for outbound envelope messages, addressed by topic name.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn publish(&self, topic: &str, message: &[u8]) -> Result<(), TransportError>;
}

/// Bounded in-process consumer.
pub struct ChannelConsumer {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelConsumer {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Build a consumer together with its sending half.
    pub fn bounded(capacity: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl MessageConsumer for ChannelConsumer {
    async fn poll(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        match timeout(wait, self.rx.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(TransportError::Closed(
                "inbound channel closed".to_string(),
            )),
            Err(_) => Ok(None),
        }
    }
}

/// Bounded in-process producer routing messages to per-topic channels.
#[derive(Default)]
pub struct ChannelProducer {
    topics: HashMap<String, mpsc::Sender<Vec<u8>>>,
}

impl ChannelProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a topic, returning its receiving half.
    pub fn attach(&mut self, topic: &str, capacity: usize) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(capacity);
        self.topics.insert(topic.to_string(), tx);
        rx
    }
}

#[async_trait]
impl MessageProducer for ChannelProducer {
    async fn publish(&self, topic: &str, message: &[u8]) -> Result<(), TransportError> {
        let tx = self
            .topics
            .get(topic)
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
        tx.send(message.to_vec())
            .await
            .map_err(|_| TransportError::Closed(format!("topic {topic} closed")))
    }
}

/// Producer that records deliveries in the log and drops them. Default
/// outbound transport when the node runs without a broker binding.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProducer;

#[async_trait]
impl MessageProducer for LoggingProducer {
    async fn publish(&self, topic: &str, message: &[u8]) -> Result<(), TransportError> {
        info!(topic = %topic, bytes = message.len(), "would publish envelope");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_consumer_delivers_queued_messages() {
        let (tx, mut consumer) = ChannelConsumer::bounded(4);
        tx.send(b"one".to_vec()).await.unwrap();

        let polled = consumer.poll(Duration::from_millis(100)).await.unwrap();
        assert_eq!(polled, Some(b"one".to_vec()));
    }

    #[tokio::test]
    async fn channel_consumer_poll_timeout_is_not_an_error() {
        let (_tx, mut consumer) = ChannelConsumer::bounded(4);
        let polled = consumer.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(polled, None);
    }

    #[tokio::test]
    async fn channel_consumer_reports_closed_sender_as_fatal() {
        let (tx, mut consumer) = ChannelConsumer::bounded(4);
        drop(tx);

        let fault = consumer
            .poll(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(fault.is_fatal());
    }

    #[tokio::test]
    async fn channel_producer_routes_by_topic() {
        let mut producer = ChannelProducer::new();
        let mut success_rx = producer.attach("success", 4);
        let mut failure_rx = producer.attach("failure", 4);

        producer.publish("success", b"ok").await.unwrap();
        producer.publish("failure", b"bad").await.unwrap();

        assert_eq!(success_rx.recv().await, Some(b"ok".to_vec()));
        assert_eq!(failure_rx.recv().await, Some(b"bad".to_vec()));
    }

    #[tokio::test]
    async fn channel_producer_rejects_unknown_topics_non_fatally() {
        let producer = ChannelProducer::new();
        let fault = producer.publish("nowhere", b"x").await.unwrap_err();
        assert!(matches!(fault, TransportError::UnknownTopic(_)));
        assert!(!fault.is_fatal());
    }

    #[tokio::test]
    async fn logging_producer_always_accepts() {
        let producer = LoggingProducer;
        producer.publish("anything", b"x").await.unwrap();
    }
}
