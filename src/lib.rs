//! # Registrar
//!
//! Event-sourced user registration command service.
//!
//! ## Architecture
//!
//! - **Version Resolver**: turns registration-intent events into version
//!   queries against the external event store
//! - **Query Correlator**: replays the store's response batches into durable
//!   user records and correlated outcomes
//! - **Persistence Gateway**: owns the user store; the store's unique
//!   indexes are the pipeline's only serialization points
//! - **Bus Adapter**: per-topic channel bundles the deployment's bus client
//!   implements; everything is tied together by correlation identifiers,
//!   not ordering

pub mod auth;
pub mod bus;
pub mod config;
pub mod error;
pub mod handlers;
pub mod messages;
pub mod service;
pub mod telemetry;
pub mod workers;

pub use error::{AuthError, ErrorKind, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::auth::{PgUserGateway, User, UserGateway, UserProfile};
    pub use crate::bus::{BusAdapter, ConsumerIo, ProducerHandle};
    pub use crate::config::Config;
    pub use crate::error::{AuthError, ErrorKind, Result};
    pub use crate::handlers::{QueryCorrelator, VersionResolver};
    pub use crate::messages::{AggregateKind, EventMessage, ResponseEnvelope, VersionQuery};
    pub use crate::service::Service;
}
