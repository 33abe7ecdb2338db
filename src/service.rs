//! Service wiring for the registration pipeline.
//!
//! Each dependency (both consumers, both producers, the store gateway the
//! caller passes in) is constructed as an explicit startup result, and the
//! bootstrap decides what is fatal instead of funnelling failures through a
//! shared channel. Per-message failures never surface here.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::UserGateway;
use crate::bus::{BusAdapter, BusError};
use crate::config::Config;
use crate::error::Result;
use crate::handlers::{QueryCorrelator, VersionResolver};
use crate::workers::WorkerPool;

/// A running registration pipeline.
pub struct Service {
    /// Intent-topic reader task
    pub resolver: JoinHandle<()>,
    /// Response-topic reader task
    pub correlator: JoinHandle<()>,
    /// Publish errors from the version-query producer; any value is fatal
    pub query_errors: mpsc::Receiver<BusError>,
    /// Publish errors from the outcome producer; any value is fatal
    pub outcome_errors: mpsc::Receiver<BusError>,
    shutdown: watch::Sender<bool>,
}

impl Service {
    /// Construct every dependency and spawn the two topic readers.
    pub async fn start<B, G>(bus: &B, gateway: Arc<G>, config: &Config) -> Result<Self>
    where
        B: BusAdapter,
        G: UserGateway + 'static,
    {
        let events = bus.consumer(&config.bus.event_topic).await?;
        let responses = bus.consumer(&config.bus.response_topic).await?;
        let queries = bus.producer(&config.bus.query_topic).await?;
        let outcomes = bus.producer(&config.bus.register_topic).await?;

        // One pool bounds in-flight handlers across both consumers.
        let pool = Arc::new(WorkerPool::new(config.workers.clone(), "handlers"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let resolver = VersionResolver::new(
            gateway.clone(),
            queries.handle,
            outcomes.handle.clone(),
            pool.clone(),
            config.bus.year_bucket,
        );
        let resolver_task = tokio::spawn(resolver.run(events, shutdown_rx.clone()));

        let correlator = QueryCorrelator::new(gateway, outcomes.handle, pool);
        let correlator_task = tokio::spawn(correlator.run(responses, shutdown_rx));

        Ok(Self {
            resolver: resolver_task,
            correlator: correlator_task,
            query_errors: queries.errors,
            outcome_errors: outcomes.errors,
            shutdown: shutdown_tx,
        })
    }

    /// Signal both readers to stop and wait for them to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.resolver.await;
        let _ = self.correlator.await;
    }
}
