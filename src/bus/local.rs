//! In-process bus transport backed by tokio channels.
//!
//! Implements the [`BusAdapter`](super::BusAdapter) contract without any
//! broker: producers and consumers of the same topic are joined by an mpsc
//! channel, and marked offsets are retained for inspection. The integration
//! tests drive the whole pipeline through this transport, and the binary
//! uses it where a deployment would plug in its real bus client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::{BusAdapter, BusError, ConsumerIo, ProducerHandle, ProducerIo};

const TOPIC_CAPACITY: usize = 1024;

struct TopicState {
    payload_tx: mpsc::Sender<Vec<u8>>,
    payload_rx: Option<mpsc::Receiver<Vec<u8>>>,
    marks_tx: mpsc::UnboundedSender<i64>,
    marks_rx: mpsc::UnboundedReceiver<i64>,
    // Held open so consumer/producer error streams stay alive; this
    // transport itself never emits into them.
    error_txs: Vec<mpsc::Sender<BusError>>,
}

impl TopicState {
    fn new() -> Self {
        let (payload_tx, payload_rx) = mpsc::channel(TOPIC_CAPACITY);
        let (marks_tx, marks_rx) = mpsc::unbounded_channel();
        Self {
            payload_tx,
            payload_rx: Some(payload_rx),
            marks_tx,
            marks_rx,
            error_txs: Vec::new(),
        }
    }
}

/// Channel-backed in-process bus.
#[derive(Clone, Default)]
pub struct LocalBus {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a message onto a topic from outside the pipeline, standing in
    /// for an upstream collaborator (the gateway producing intents, or the
    /// event store answering queries).
    pub async fn publish<T: Serialize>(&self, topic: &str, message: &T) -> Result<(), BusError> {
        let payload = serde_json::to_vec(message).map_err(|err| BusError::Publish {
            topic: topic.to_string(),
            reason: err.to_string(),
        })?;

        let tx = {
            let mut topics = self.topics.lock();
            topics
                .entry(topic.to_string())
                .or_insert_with(TopicState::new)
                .payload_tx
                .clone()
        };

        tx.send(payload).await.map_err(|_| BusError::Closed {
            topic: topic.to_string(),
        })
    }

    /// Offsets marked as processed on a topic so far.
    pub fn marked_offsets(&self, topic: &str) -> Vec<i64> {
        let mut topics = self.topics.lock();
        let Some(state) = topics.get_mut(topic) else {
            return Vec::new();
        };

        let mut marked = Vec::new();
        while let Ok(offset) = state.marks_rx.try_recv() {
            marked.push(offset);
        }
        marked
    }
}

#[async_trait]
impl BusAdapter for LocalBus {
    async fn consumer(&self, topic: &str) -> Result<ConsumerIo, BusError> {
        let (error_tx, error_rx) = mpsc::channel(16);

        let mut topics = self.topics.lock();
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(TopicState::new);

        let payload_rx = state.payload_rx.take().ok_or_else(|| BusError::ConsumerTaken {
            topic: topic.to_string(),
        })?;
        state.error_txs.push(error_tx);

        Ok(ConsumerIo::new(
            Arc::from(topic),
            payload_rx,
            error_rx,
            state.marks_tx.clone(),
        ))
    }

    async fn producer(&self, topic: &str) -> Result<ProducerIo, BusError> {
        let (error_tx, error_rx) = mpsc::channel(16);

        let mut topics = self.topics.lock();
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(TopicState::new);
        state.error_txs.push(error_tx);

        Ok(ProducerIo {
            handle: ProducerHandle::new(Arc::from(topic), state.payload_tx.clone()),
            errors: error_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_consume_roundtrip() {
        let bus = LocalBus::new();
        let mut consumer = bus.consumer("events").await.unwrap();

        bus.publish("events", &serde_json::json!({"n": 1})).await.unwrap();
        bus.publish("events", &serde_json::json!({"n": 2})).await.unwrap();

        let first = consumer.next().await.unwrap();
        let second = consumer.next().await.unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);

        let decoded: serde_json::Value = serde_json::from_slice(&second.payload).unwrap();
        assert_eq!(decoded["n"], 2);
    }

    #[tokio::test]
    async fn test_producer_feeds_consumer() {
        let bus = LocalBus::new();
        let mut consumer = bus.consumer("queries").await.unwrap();
        let producer = bus.producer("queries").await.unwrap();

        producer
            .handle
            .publish(&serde_json::json!({"version": 1}))
            .await
            .unwrap();

        let delivery = consumer.next().await.unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(decoded["version"], 1);
    }

    #[tokio::test]
    async fn test_second_consumer_is_rejected() {
        let bus = LocalBus::new();
        let _first = bus.consumer("events").await.unwrap();

        let second = bus.consumer("events").await;
        assert!(matches!(second, Err(BusError::ConsumerTaken { .. })));
    }

    #[tokio::test]
    async fn test_offset_marks_are_recorded() {
        let bus = LocalBus::new();
        let mut consumer = bus.consumer("events").await.unwrap();
        let marker = consumer.marker();

        bus.publish("events", &serde_json::json!({})).await.unwrap();
        let delivery = consumer.next().await.unwrap();
        marker.mark(delivery.offset);

        assert_eq!(bus.marked_offsets("events"), vec![0]);
        assert!(bus.marked_offsets("events").is_empty());
    }
}
