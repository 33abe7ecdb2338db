//! Version Resolver: the first hop of the registration pipeline.
//!
//! Consumes registration-intent events, asks the persistence gateway for the
//! current aggregate version, and emits a version query carrying the intent's
//! correlation identifier. Holds no state across events; on a gateway failure
//! the requester receives an `Internal` outcome immediately.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::UserGateway;
use crate::bus::{dispatch, ConsumerIo, Dispatch, ProducerHandle};
use crate::error::Result;
use crate::messages::{AggregateKind, EventMessage, ResponseEnvelope, VersionQuery};
use crate::workers::WorkerPool;

/// Consumes intent events and emits version queries.
pub struct VersionResolver<G> {
    gateway: Arc<G>,
    queries: ProducerHandle,
    outcomes: ProducerHandle,
    pool: Arc<WorkerPool>,
    year_bucket: i32,
}

impl<G> Clone for VersionResolver<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            queries: self.queries.clone(),
            outcomes: self.outcomes.clone(),
            pool: self.pool.clone(),
            year_bucket: self.year_bucket,
        }
    }
}

impl<G: UserGateway + 'static> VersionResolver<G> {
    pub fn new(
        gateway: Arc<G>,
        queries: ProducerHandle,
        outcomes: ProducerHandle,
        pool: Arc<WorkerPool>,
        year_bucket: i32,
    ) -> Self {
        Self {
            gateway,
            queries,
            outcomes,
            pool,
            year_bucket,
        }
    }

    /// Drain the intent topic until the stream ends or shutdown is signalled.
    pub async fn run(self, mut consumer: ConsumerIo, mut shutdown: watch::Receiver<bool>) {
        info!(topic = consumer.topic(), "version resolver started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                delivery = consumer.next() => {
                    let Some(delivery) = delivery else { break };
                    let marker = consumer.marker();

                    match dispatch::<EventMessage>(AggregateKind::User, &delivery.payload) {
                        Dispatch::Accepted(event) => {
                            // Redelivery would only duplicate a query, never
                            // corrupt state, so the offset is marked before
                            // any downstream work.
                            marker.mark(delivery.offset);
                            self.spawn_handler(event).await;
                        }
                        Dispatch::Foreign(kind) => {
                            marker.mark(delivery.offset);
                            debug!(
                                aggregate_id = kind,
                                offset = delivery.offset,
                                "ignoring foreign aggregate event"
                            );
                        }
                        Dispatch::Undecodable(err) => {
                            // Poison messages are acknowledged; redelivery
                            // cannot make them decodable.
                            marker.mark(delivery.offset);
                            err.log();
                        }
                    }
                }
            }
        }

        info!("version resolver stopped");
    }

    /// Launch one handling task for an accepted event.
    ///
    /// Waiting for a permit here delays consumption of the next message when
    /// the pool is at capacity; a permit that cannot be acquired within the
    /// timeout fails the event like any other internal error.
    async fn spawn_handler(&self, event: EventMessage) {
        let permit = match self.pool.acquire().await {
            Ok(permit) => permit,
            Err(err) => {
                err.log();
                self.emit_outcome(ResponseEnvelope::failure(event.correlation_id, &err))
                    .await;
                return;
            }
        };

        let worker = self.clone();
        tokio::spawn(async move {
            match worker.handle(event).await {
                Ok(()) => permit.mark_success(),
                Err(_) => permit.mark_failure(),
            }
        });
    }

    async fn handle(&self, event: EventMessage) -> Result<()> {
        match self.gateway.max_version().await {
            Ok(version) => {
                let query = VersionQuery {
                    aggregate: AggregateKind::User,
                    correlation_id: event.correlation_id,
                    version,
                    year_bucket: self.year_bucket,
                };

                self.queries.publish(&query).await.map_err(|err| {
                    warn!(
                        correlation_id = %event.correlation_id,
                        error = %err,
                        "version query publish failed"
                    );
                    crate::error::AuthError::from(err)
                })?;

                counter!("registrar_version_queries_total").increment(1);
                debug!(
                    correlation_id = %event.correlation_id,
                    version,
                    "version query emitted"
                );
                Ok(())
            }
            Err(err) => {
                err.log();
                self.emit_outcome(ResponseEnvelope::failure(event.correlation_id, &err))
                    .await;
                Err(err)
            }
        }
    }

    async fn emit_outcome(&self, outcome: ResponseEnvelope) {
        if let Err(err) = self.outcomes.publish(&outcome).await {
            warn!(
                correlation_id = %outcome.correlation_id,
                error = %err,
                "outcome publish failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryUserGateway, User, UserProfile};
    use crate::bus::local::LocalBus;
    use crate::bus::BusAdapter;
    use crate::config::WorkerSettings;
    use crate::error::AuthError;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct BrokenGateway;

    #[async_trait]
    impl UserGateway for BrokenGateway {
        async fn register(&self, _user: User) -> Result<UserProfile> {
            Err(AuthError::internal("store unreachable"))
        }

        async fn max_version(&self) -> Result<i64> {
            Err(AuthError::internal("store unreachable"))
        }
    }

    async fn resolver_with<G: UserGateway + 'static>(
        bus: &LocalBus,
        gateway: G,
    ) -> VersionResolver<G> {
        let queries = bus.producer("queries").await.unwrap();
        let outcomes = bus.producer("outcomes").await.unwrap();
        VersionResolver::new(
            Arc::new(gateway),
            queries.handle,
            outcomes.handle,
            Arc::new(WorkerPool::new(WorkerSettings::default(), "test")),
            2018,
        )
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

    #[tokio::test]
    async fn test_handle_emits_query_with_bootstrap_version() {
        let bus = LocalBus::new();
        let mut queries = bus.consumer("queries").await.unwrap();
        let resolver = resolver_with(&bus, MemoryUserGateway::new()).await;

        let correlation_id = Uuid::new_v4();
        resolver.handle(intent(correlation_id)).await.unwrap();

        let delivery = queries.next().await.unwrap();
        let query: VersionQuery = serde_json::from_slice(&delivery.payload).unwrap();

        assert_eq!(query.version, 1);
        assert_eq!(query.correlation_id, correlation_id);
        assert_eq!(query.year_bucket, 2018);
    }

    #[tokio::test]
    async fn test_handle_emits_internal_outcome_on_gateway_failure() {
        let bus = LocalBus::new();
        let mut outcomes = bus.consumer("outcomes").await.unwrap();
        let resolver = resolver_with(&bus, BrokenGateway).await;

        let correlation_id = Uuid::new_v4();
        let result = resolver.handle(intent(correlation_id)).await;
        assert!(result.is_err());

        let delivery = outcomes.next().await.unwrap();
        let outcome: ResponseEnvelope = serde_json::from_slice(&delivery.payload).unwrap();

        assert!(outcome.is_error());
        assert_eq!(outcome.correlation_id, correlation_id);
        assert_eq!(outcome.error_code, crate::error::ErrorKind::Internal.wire_code());
    }
}
