//! Wire envelopes for the registration pipeline.
//!
//! Three message shapes tie the pipeline's asynchronous hops together:
//! intent events in, version queries out, and the response envelope used
//! both for the inbound event-store result batch and the outbound outcome.
//! The only thread connecting a hop to the next is the correlation
//! identifier, generated once at intent time and propagated unchanged.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;

// ═══════════════════════════════════════════════════════════════════════════════
// Aggregate Kind
// ═══════════════════════════════════════════════════════════════════════════════

/// Typed aggregate discriminator shared by every message on the bus.
///
/// Topics are multiplexed across aggregate types; each message carries the
/// kind of the aggregate it belongs to, and consumers accept only their own.
/// The enum round-trips through the integer wire value so an unknown
/// discriminator fails decoding instead of slipping past a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum AggregateKind {
    /// The user aggregate.
    User,
}

impl AggregateKind {
    /// The integer this kind encodes to on the wire.
    pub const fn wire_value(self) -> i32 {
        match self {
            Self::User => 1,
        }
    }
}

impl From<AggregateKind> for i32 {
    fn from(kind: AggregateKind) -> Self {
        kind.wire_value()
    }
}

impl TryFrom<i32> for AggregateKind {
    type Error = UnknownAggregateKind;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::User),
            other => Err(UnknownAggregateKind(other)),
        }
    }
}

impl std::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An aggregate discriminator no consumer in this service recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown aggregate kind: {0}")]
pub struct UnknownAggregateKind(pub i32);

// ═══════════════════════════════════════════════════════════════════════════════
// Envelopes
// ═══════════════════════════════════════════════════════════════════════════════

/// One hydrated occurrence from the event store.
///
/// Inbound as a registration intent, and again inside a response batch once
/// the event store has replayed it. The `data` payload is opaque to the bus;
/// only the correlator decodes it into a user draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Aggregate this event belongs to
    #[serde(rename = "aggregate_id")]
    pub aggregate: AggregateKind,

    /// Correlation identifier propagated unchanged across all hops
    pub correlation_id: Uuid,

    /// Sequence position of the aggregate this event hydrates
    pub version: i64,

    /// Opaque payload (the serialized user-to-be)
    #[serde(default)]
    pub data: serde_json::Value,

    /// Event identity
    pub uuid: Uuid,
}

/// A version query produced once per accepted intent event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionQuery {
    /// Aggregate the query concerns
    #[serde(rename = "aggregate_id")]
    pub aggregate: AggregateKind,

    /// Correlation identifier of the originating intent
    pub correlation_id: Uuid,

    /// Version observed in the store at request time
    pub version: i64,

    /// Time-partition hint for the event store
    pub year_bucket: i32,
}

/// Response envelope: event-store result batches inbound, outcomes outbound.
///
/// Terminal once emitted; `result` carries a list of hydrated events on the
/// inbound side and a sanitized user on the outbound side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Aggregate the response concerns
    #[serde(rename = "aggregate_id")]
    pub aggregate: AggregateKind,

    /// Correlation identifier of the originating request
    pub correlation_id: Uuid,

    /// Success payload
    #[serde(default)]
    pub result: serde_json::Value,

    /// Human-readable error description, empty on success
    #[serde(default)]
    pub error: String,

    /// Stable error code, zero on success
    #[serde(default)]
    pub error_code: i16,
}

impl ResponseEnvelope {
    /// Build a success outcome carrying `result`.
    pub fn success(correlation_id: Uuid, result: serde_json::Value) -> Self {
        Self {
            aggregate: AggregateKind::User,
            correlation_id,
            result,
            error: String::new(),
            error_code: 0,
        }
    }

    /// Build a failure outcome from an error, preserving its kind verbatim.
    pub fn failure(correlation_id: Uuid, error: &AuthError) -> Self {
        Self {
            aggregate: AggregateKind::User,
            correlation_id,
            result: serde_json::Value::Null,
            error: error.to_string(),
            error_code: error.wire_code(),
        }
    }

    /// Whether this envelope reports a failure.
    pub fn is_error(&self) -> bool {
        self.error_code != 0 || !self.error.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
