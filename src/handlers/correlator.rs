//! Query Correlator: the final hop of the registration pipeline.
//!
//! Consumes version-query response batches from the event store, rebuilds a
//! user draft from each hydrated event, persists it through the gateway, and
//! emits one correlated outcome per event. Sibling events in a batch replay
//! independently and concurrently; a bad event never blocks the rest.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::{User, UserGateway};
use crate::bus::{dispatch, ConsumerIo, Dispatch, ProducerHandle};
use crate::error::{AuthError, Result};
use crate::messages::{AggregateKind, EventMessage, ResponseEnvelope};
use crate::workers::WorkerPool;

/// Consumes response batches and persists the users they hydrate.
pub struct QueryCorrelator<G> {
    gateway: Arc<G>,
    outcomes: ProducerHandle,
    pool: Arc<WorkerPool>,
}

impl<G> Clone for QueryCorrelator<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            outcomes: self.outcomes.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<G: UserGateway + 'static> QueryCorrelator<G> {
    pub fn new(gateway: Arc<G>, outcomes: ProducerHandle, pool: Arc<WorkerPool>) -> Self {
        Self {
            gateway,
            outcomes,
            pool,
        }
    }

    /// Drain the response topic until the stream ends or shutdown is
    /// signalled.
    pub async fn run(self, mut consumer: ConsumerIo, mut shutdown: watch::Receiver<bool>) {
        info!(topic = consumer.topic(), "query correlator started");

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

                    match dispatch::<ResponseEnvelope>(AggregateKind::User, &delivery.payload) {
                        Dispatch::Accepted(envelope) => {
                            marker.mark(delivery.offset);
                            self.spawn_handler(envelope).await;
                        }
                        Dispatch::Foreign(kind) => {
                            marker.mark(delivery.offset);
                            debug!(
                                aggregate_id = kind,
                                offset = delivery.offset,
                                "ignoring foreign aggregate response"
                            );
                        }
                        Dispatch::Undecodable(err) => {
                            marker.mark(delivery.offset);
                            err.log();
                        }
                    }
                }
            }
        }

        info!("query correlator stopped");
    }

    /// Launch one handling task for an accepted response batch.
    async fn spawn_handler(&self, envelope: ResponseEnvelope) {
        let permit = match self.pool.acquire().await {
            Ok(permit) => permit,
            Err(err) => {
                err.log();
                self.emit_outcome(ResponseEnvelope::failure(envelope.correlation_id, &err))
                    .await;
                return;
            }
        };

        let worker = self.clone();
        tokio::spawn(async move {
            match worker.handle_response(envelope).await {
                Ok(()) => permit.mark_success(),
                Err(_) => permit.mark_failure(),
            }
        });
    }

    async fn handle_response(&self, envelope: ResponseEnvelope) -> Result<()> {
        let correlation_id = envelope.correlation_id;

        if envelope.is_error() {
            // The event store could not answer the query; the requester still
            // gets a correlated outcome.
            let err = AuthError::internal(format!(
                "event store query failed: {}",
                envelope.error
            ));
            err.log();
            self.emit_outcome(ResponseEnvelope::failure(correlation_id, &err))
                .await;
            return Err(err);
        }

        let events: Vec<EventMessage> = match serde_json::from_value(envelope.result) {
            Ok(events) => events,
            Err(err) => {
                let err = AuthError::from(err);
                err.log();
                self.emit_outcome(ResponseEnvelope::failure(correlation_id, &err))
                    .await;
                return Err(err);
            }
        };

        debug!(
            correlation_id = %correlation_id,
            event_count = events.len(),
            "replaying response batch"
        );

        // Each event carries its own correlation identifier and version, so
        // ordering between siblings does not matter.
        futures::future::join_all(events.into_iter().map(|event| {
            let worker = self.clone();
            async move { worker.replay_event(event).await }
        }))
        .await;

        Ok(())
    }

    /// Rebuild and persist the user one hydrated event describes.
    async fn replay_event(&self, event: EventMessage) {
        let correlation_id = event.correlation_id;

        let mut user: User = match serde_json::from_value(event.data) {
            Ok(user) => user,
            Err(err) => {
                let err = AuthError::from(err);
                warn!(
                    correlation_id = %correlation_id,
                    event_id = %event.uuid,
                    error = %err,
                    "event payload is not a user draft"
                );
                self.emit_outcome(ResponseEnvelope::failure(correlation_id, &err))
                    .await;
                return;
            }
        };

        // The version replayed from the event is authoritative.
        user.version = event.version;

        match self.gateway.register(user).await {
            Ok(profile) => {
                let result = match serde_json::to_value(&profile) {
                    Ok(result) => result,
                    Err(err) => {
                        let err = AuthError::from(err);
                        err.log();
                        self.emit_outcome(ResponseEnvelope::failure(correlation_id, &err))
                            .await;
                        return;
                    }
                };

                counter!("registrar_outcomes_total", "result" => "success").increment(1);
                debug!(
                    correlation_id = %correlation_id,
                    username = %profile.username,
                    version = profile.version,
                    "user registered"
                );
                self.emit_outcome(ResponseEnvelope::success(correlation_id, result))
                    .await;
            }
            Err(err) => {
                err.log();
                counter!("registrar_outcomes_total", "result" => err.kind().to_string())
                    .increment(1);
                self.emit_outcome(ResponseEnvelope::failure(correlation_id, &err))
                    .await;
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
