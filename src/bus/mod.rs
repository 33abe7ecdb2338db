//! Message-bus adapter boundary.
//!
//! The bus client itself (connection management, consumer-group membership,
//! partition bookkeeping) is an external collaborator; the pipeline depends
//! only on the channel bundles defined here. A deployment's bus client
//! implements [`BusAdapter`] by pumping its own consumer/producer into these
//! channels; [`local::LocalBus`] does the same fully in-process.
//!
//! Delivery is at-least-once: every message accepted for processing must be
//! marked via its [`OffsetMarker`], even when the business logic fails,
//! so a poison message cannot be redelivered forever.

pub mod local;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::AuthError;
use crate::messages::AggregateKind;

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Transport-level bus failure.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// A topic can have at most one consumer in this process.
    #[error("topic '{topic}' already has a consumer")]
    ConsumerTaken { topic: String },

    /// Publishing a message failed before it reached the transport.
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// The transport channel for a topic is gone.
    #[error("bus channel for '{topic}' closed")]
    Closed { topic: String },
}

impl From<BusError> for AuthError {
    fn from(error: BusError) -> Self {
        AuthError::internal(error.to_string()).with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Adapter Contract
// ═══════════════════════════════════════════════════════════════════════════════

/// Constructs per-topic consume/produce channel bundles.
#[async_trait]
pub trait BusAdapter {
    /// Create the consumer bundle for a topic. At most one per topic.
    async fn consumer(&self, topic: &str) -> Result<ConsumerIo, BusError>;

    /// Create a producer bundle for a topic.
    async fn producer(&self, topic: &str) -> Result<ProducerIo, BusError>;
}

/// One message as delivered by the bus, with its log position.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Offset of this message in the topic as seen by the consumer
    pub offset: i64,
    /// Raw message payload
    pub payload: Vec<u8>,
}

/// Consumer side of a topic: an ordered message stream, a transport-error
/// stream, and a sink for marking offsets durably processed.
pub struct ConsumerIo {
    topic: Arc<str>,
    payloads: mpsc::Receiver<Vec<u8>>,
    errors: mpsc::Receiver<BusError>,
    marks: mpsc::UnboundedSender<i64>,
    next_offset: i64,
}

impl ConsumerIo {
    pub(crate) fn new(
        topic: Arc<str>,
        payloads: mpsc::Receiver<Vec<u8>>,
        errors: mpsc::Receiver<BusError>,
        marks: mpsc::UnboundedSender<i64>,
    ) -> Self {
        Self {
            topic,
            payloads,
            errors,
            marks,
            next_offset: 0,
        }
    }

    /// The topic this consumer is subscribed to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive the next delivery, in arrival order.
    ///
    /// Transport errors are logged and the stream continues; at-least-once
    /// delivery means the bus redelivers anything lost to a transient fault.
    /// Returns `None` once the transport channel is closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            tokio::select! {
                payload = self.payloads.recv() => {
                    let payload = payload?;
                    let offset = self.next_offset;
                    self.next_offset += 1;
                    return Some(Delivery { offset, payload });
                }
                Some(err) = self.errors.recv() => {
                    tracing::warn!(topic = %self.topic, error = %err, "bus transport error");
                }
            }
        }
    }

    /// Handle for marking a delivery's offset as durably processed.
    pub fn marker(&self) -> OffsetMarker {
        OffsetMarker {
            topic: self.topic.clone(),
            marks: self.marks.clone(),
        }
    }
}

/// Clonable sink acknowledging that a consumed message has been handled.
#[derive(Clone)]
pub struct OffsetMarker {
    topic: Arc<str>,
    marks: mpsc::UnboundedSender<i64>,
}

impl OffsetMarker {
    /// Mark the offset as processed. Best effort: a closed mark channel only
    /// means the adapter is shutting down and redelivery no longer matters.
    pub fn mark(&self, offset: i64) {
        if self.marks.send(offset).is_err() {
            tracing::debug!(topic = %self.topic, offset, "offset mark dropped during shutdown");
        }
    }
}

/// Producer side of a topic, split into a clonable publish handle and the
/// publish-error stream the supervisor watches.
pub struct ProducerIo {
    /// Input sink accepting outbound payloads
    pub handle: ProducerHandle,
    /// Stream of publish errors; any value here is escalated by the caller
    pub errors: mpsc::Receiver<BusError>,
}

/// Clonable input sink for one topic.
#[derive(Clone)]
pub struct ProducerHandle {
    topic: Arc<str>,
    input: mpsc::Sender<Vec<u8>>,
}

impl ProducerHandle {
    pub(crate) fn new(topic: Arc<str>, input: mpsc::Sender<Vec<u8>>) -> Self {
        Self { topic, input }
    }

    /// The topic this producer publishes to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serialize and publish one message.
    pub async fn publish<T: Serialize>(&self, message: &T) -> Result<(), BusError> {
        let payload = serde_json::to_vec(message).map_err(|err| BusError::Publish {
            topic: self.topic.to_string(),
            reason: err.to_string(),
        })?;

        self.input
            .send(payload)
            .await
            .map_err(|_| BusError::Closed {
                topic: self.topic.to_string(),
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Typed Dispatch
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of decoding one delivery at the adapter boundary.
#[derive(Debug)]
pub enum Dispatch<T> {
    /// The message carries the expected aggregate kind and decoded cleanly.
    Accepted(T),
    /// The message belongs to some other aggregate sharing the topic.
    Foreign(i32),
    /// The payload could not be decoded.
    Undecodable(AuthError),
}

#[derive(Deserialize)]
struct KindProbe {
    aggregate_id: i32,
}

/// Decode a delivery and validate its aggregate kind in one place.
///
/// The kind is probed before the full decode so a foreign aggregate's
/// payload shape never counts as a decoding failure of ours.
pub fn dispatch<T: DeserializeOwned>(expected: AggregateKind, payload: &[u8]) -> Dispatch<T> {
    let probe: KindProbe = match serde_json::from_slice(payload) {
        Ok(probe) => probe,
        Err(err) => return Dispatch::Undecodable(AuthError::from(err)),
    };

    if probe.aggregate_id != expected.wire_value() {
        return Dispatch::Foreign(probe.aggregate_id);
    }

    match serde_json::from_slice(payload) {
        Ok(message) => Dispatch::Accepted(message),
        Err(err) => Dispatch::Undecodable(AuthError::from(err)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::EventMessage;
    use uuid::Uuid;

    fn intent_payload(aggregate_id: i32) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "aggregate_id": aggregate_id,
            "correlation_id": Uuid::new_v4(),
            "version": 0,
            "data": null,
            "uuid": Uuid::new_v4(),
        }))
        .unwrap()
    }

    #[test]
    fn test_dispatch_accepts_matching_kind() {
        let payload = intent_payload(1);
        match dispatch::<EventMessage>(AggregateKind::User, &payload) {
            Dispatch::Accepted(event) => assert_eq!(event.aggregate, AggregateKind::User),
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_rejects_foreign_kind() {
        let payload = intent_payload(7);
        match dispatch::<EventMessage>(AggregateKind::User, &payload) {
            Dispatch::Foreign(kind) => assert_eq!(kind, 7),
            other => panic!("expected foreign kind, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_flags_undecodable_payload() {
        match dispatch::<EventMessage>(AggregateKind::User, b"not json") {
            Dispatch::Undecodable(_) => {}
            other => panic!("expected undecodable, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_flags_matching_kind_with_bad_shape() {
        // Right aggregate, but the body is not an intent event.
        let payload = serde_json::to_vec(&serde_json::json!({"aggregate_id": 1})).unwrap();
        match dispatch::<EventMessage>(AggregateKind::User, &payload) {
            Dispatch::Undecodable(_) => {}
            other => panic!("expected undecodable, got {other:?}"),
        }
    }
}
