//! End-to-end tests for the registration pipeline.
//!
//! The whole service runs against the in-process bus and the in-memory
//! gateway: intents go in on the event topic, version queries and outcomes
//! come out on theirs, and the only thread between the hops is the
//! correlation identifier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use registrar::auth::{MemoryUserGateway, User, UserGateway, UserProfile};
use registrar::bus::local::LocalBus;
use registrar::bus::{BusAdapter, ConsumerIo};
use registrar::config::Config;
use registrar::error::{AuthError, ErrorKind};
use registrar::messages::{AggregateKind, EventMessage, ResponseEnvelope, VersionQuery};
use registrar::service::Service;

const EVENT_TOPIC: &str = "events";
const QUERY_TOPIC: &str = "queries";
const RESPONSE_TOPIC: &str = "responses";
const REGISTER_TOPIC: &str = "outcomes";

fn test_config() -> Config {
    serde_json::from_value(serde_json::json!({
        "bus": {
            "brokers": "localhost:9092",
            "event_topic": EVENT_TOPIC,
            "query_topic": QUERY_TOPIC,
            "response_topic": RESPONSE_TOPIC,
            "register_topic": REGISTER_TOPIC,
        },
        "store": { "url": "postgres://unused" },
        "workers": { "max_in_flight": 8, "acquire_timeout_ms": 1000 }
    }))
    .unwrap()
}

fn intent(correlation_id: Uuid) -> EventMessage {
    EventMessage {
        aggregate: AggregateKind::User,
        correlation_id,
        version: 0,
        data: serde_json::Value::Null,
        uuid: Uuid::new_v4(),
    }
}

fn hydrated_event(username: &str, version: i64, correlation_id: Uuid) -> EventMessage {
    EventMessage {
        aggregate: AggregateKind::User,
        correlation_id,
        version,
        data: serde_json::json!({
            "username": username,
            "email": format!("{username}@x.com"),
            "password": "secret",
        }),
        uuid: Uuid::new_v4(),
    }
}

async fn recv<T: serde::de::DeserializeOwned>(consumer: &mut ConsumerIo) -> T {
    let delivery = tokio::time::timeout(Duration::from_secs(2), consumer.next())
        .await
        .expect("timed out waiting for a message")
        .expect("topic closed");
    serde_json::from_slice(&delivery.payload).expect("undecodable message")
}

async fn assert_silent(consumer: &mut ConsumerIo) {
    let result = tokio::time::timeout(Duration::from_millis(200), consumer.next()).await;
    assert!(result.is_err(), "expected no message on the topic");
}

// ============================================================================
// Version Resolver Flow
// ============================================================================

#[tokio::test]
async fn intent_on_empty_store_yields_bootstrap_version_query() {
    let bus = LocalBus::new();
    let mut queries = bus.consumer(QUERY_TOPIC).await.unwrap();
    let service = Service::start(&bus, Arc::new(MemoryUserGateway::new()), &test_config())
        .await
        .unwrap();

    let correlation_id = Uuid::new_v4();
    bus.publish(EVENT_TOPIC, &intent(correlation_id)).await.unwrap();

    let query: VersionQuery = recv(&mut queries).await;
    assert_eq!(query.version, 1);
    assert_eq!(query.correlation_id, correlation_id);
    assert_eq!(query.aggregate, AggregateKind::User);

    // Accepted intents are acknowledged before the query round-trip.
    assert_eq!(bus.marked_offsets(EVENT_TOPIC), vec![0]);

    service.shutdown().await;
}

#[tokio::test]
async fn intent_reflects_current_max_version() {
    let bus = LocalBus::new();
    let mut queries = bus.consumer(QUERY_TOPIC).await.unwrap();

    let gateway = MemoryUserGateway::new();
    for (username, version) in [("alice", 1), ("bob", 4)] {
        let draft: User = serde_json::from_value(serde_json::json!({
            "username": username,
            "password": "secret",
            "version": version,
        }))
        .unwrap();
        gateway.register(draft).await.unwrap();
    }

    let service = Service::start(&bus, Arc::new(gateway), &test_config())
        .await
        .unwrap();

    bus.publish(EVENT_TOPIC, &intent(Uuid::new_v4())).await.unwrap();

    let query: VersionQuery = recv(&mut queries).await;
    assert_eq!(query.version, 4);

    service.shutdown().await;
}

#[tokio::test]
async fn foreign_aggregate_intent_is_acknowledged_and_dropped() {
    let bus = LocalBus::new();
    let mut queries = bus.consumer(QUERY_TOPIC).await.unwrap();
    let service = Service::start(&bus, Arc::new(MemoryUserGateway::new()), &test_config())
        .await
        .unwrap();

    bus.publish(
        EVENT_TOPIC,
        &serde_json::json!({
            "aggregate_id": 7,
            "correlation_id": Uuid::new_v4(),
            "version": 0,
            "uuid": Uuid::new_v4(),
        }),
    )
    .await
    .unwrap();

    assert_silent(&mut queries).await;
    assert_eq!(bus.marked_offsets(EVENT_TOPIC), vec![0]);

    service.shutdown().await;
}

#[tokio::test]
async fn gateway_failure_yields_correlated_internal_outcome() {
    struct BrokenGateway;

    #[async_trait]
    impl UserGateway for BrokenGateway {
        async fn register(&self, _user: User) -> registrar::Result<UserProfile> {
            Err(AuthError::internal("store unreachable"))
        }

        async fn max_version(&self) -> registrar::Result<i64> {
            Err(AuthError::internal("store unreachable"))
        }
    }

    let bus = LocalBus::new();
    let mut queries = bus.consumer(QUERY_TOPIC).await.unwrap();
    let mut outcomes = bus.consumer(REGISTER_TOPIC).await.unwrap();
    let service = Service::start(&bus, Arc::new(BrokenGateway), &test_config())
        .await
        .unwrap();

    let correlation_id = Uuid::new_v4();
    bus.publish(EVENT_TOPIC, &intent(correlation_id)).await.unwrap();

    let outcome: ResponseEnvelope = recv(&mut outcomes).await;
    assert_eq!(outcome.correlation_id, correlation_id);
    assert_eq!(outcome.error_code, ErrorKind::Internal.wire_code());
    assert_silent(&mut queries).await;

    service.shutdown().await;
}

// ============================================================================
// Query Correlator Flow
// ============================================================================

#[tokio::test]
async fn replayed_event_is_persisted_and_sanitized() {
    let bus = LocalBus::new();
    let mut outcomes = bus.consumer(REGISTER_TOPIC).await.unwrap();
    let gateway = MemoryUserGateway::new();
    let service = Service::start(&bus, Arc::new(gateway.clone()), &test_config())
        .await
        .unwrap();

    let correlation_id = Uuid::new_v4();
    let batch = ResponseEnvelope::success(
        Uuid::new_v4(),
        serde_json::to_value([hydrated_event("alice", 5, correlation_id)]).unwrap(),
    );
    bus.publish(RESPONSE_TOPIC, &batch).await.unwrap();

    let outcome: ResponseEnvelope = recv(&mut outcomes).await;
    assert!(!outcome.is_error());
    assert_eq!(outcome.correlation_id, correlation_id);
    assert_eq!(outcome.result["version"], 5);
    assert_eq!(outcome.result["username"], "alice");
    assert!(outcome.result.get("password").is_none());

    let records = gateway.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].version, 5);
    assert_ne!(records[0].password, "secret");

    service.shutdown().await;
}

#[tokio::test]
async fn duplicate_username_in_one_batch_yields_one_success_one_rejection() {
    let bus = LocalBus::new();
    let mut outcomes = bus.consumer(REGISTER_TOPIC).await.unwrap();
    let gateway = MemoryUserGateway::new();
    let service = Service::start(&bus, Arc::new(gateway.clone()), &test_config())
        .await
        .unwrap();

    let first_id = Uuid::new_v4();
    let second_id = Uuid::new_v4();
    let batch = ResponseEnvelope::success(
        Uuid::new_v4(),
        serde_json::to_value([
            hydrated_event("bob", 1, first_id),
            hydrated_event("bob", 2, second_id),
        ])
        .unwrap(),
    );
    bus.publish(RESPONSE_TOPIC, &batch).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(recv::<ResponseEnvelope>(&mut outcomes).await);
    }

    let successes = seen.iter().filter(|o| !o.is_error()).count();
    let duplicates = seen
        .iter()
        .filter(|o| o.error_code == ErrorKind::DuplicateUsername.wire_code())
        .count();

    assert_eq!(successes, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(gateway.records().len(), 1);

    // Both outcomes carry their own event's correlation identifier.
    let mut correlations: Vec<Uuid> = seen.iter().map(|o| o.correlation_id).collect();
    correlations.sort();
    let mut expected = vec![first_id, second_id];
    expected.sort();
    assert_eq!(correlations, expected);

    service.shutdown().await;
}

#[tokio::test]
async fn undecodable_batch_yields_internal_outcome_with_batch_correlation() {
    let bus = LocalBus::new();
    let mut outcomes = bus.consumer(REGISTER_TOPIC).await.unwrap();
    let service = Service::start(&bus, Arc::new(MemoryUserGateway::new()), &test_config())
        .await
        .unwrap();

    let correlation_id = Uuid::new_v4();
    let batch = ResponseEnvelope::success(correlation_id, serde_json::json!("not a batch"));
    bus.publish(RESPONSE_TOPIC, &batch).await.unwrap();

    let outcome: ResponseEnvelope = recv(&mut outcomes).await;
    assert_eq!(outcome.correlation_id, correlation_id);
    assert_eq!(outcome.error_code, ErrorKind::Internal.wire_code());

    service.shutdown().await;
}

// ============================================================================
// Full Round Trip
// ============================================================================

#[tokio::test]
async fn correlation_identifier_survives_all_three_hops() {
    let bus = LocalBus::new();
    let mut queries = bus.consumer(QUERY_TOPIC).await.unwrap();
    let mut outcomes = bus.consumer(REGISTER_TOPIC).await.unwrap();
    let gateway = MemoryUserGateway::new();
    let service = Service::start(&bus, Arc::new(gateway.clone()), &test_config())
        .await
        .unwrap();

    // Hop 1: the requester's intent.
    let correlation_id = Uuid::new_v4();
    bus.publish(EVENT_TOPIC, &intent(correlation_id)).await.unwrap();

    // Hop 2: the resolver's query reaches the event store.
    let query: VersionQuery = recv(&mut queries).await;
    assert_eq!(query.correlation_id, correlation_id);
    assert_eq!(query.version, 1);

    // Hop 3: the event store answers with the hydrated event; the stand-in
    // here replays the registration at the queried version.
    let batch = ResponseEnvelope::success(
        correlation_id,
        serde_json::to_value([hydrated_event("alice", query.version, correlation_id)]).unwrap(),
    );
    bus.publish(RESPONSE_TOPIC, &batch).await.unwrap();

    let outcome: ResponseEnvelope = recv(&mut outcomes).await;
    assert!(!outcome.is_error());
    assert_eq!(outcome.correlation_id, correlation_id);
    assert_eq!(outcome.result["version"], 1);

    assert_eq!(gateway.records().len(), 1);

    service.shutdown().await;
}
