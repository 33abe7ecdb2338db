//! Configuration management.
//!
//! Every required option must be present before the first message is
//! consumed; a missing broker list, topic name or store URL fails
//! deserialization and the process exits before touching the bus.

use serde::Deserialize;

use crate::telemetry::TelemetryConfig;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Message-bus configuration
    pub bus: BusConfig,

    /// Durable-store configuration
    pub store: StoreConfig,

    /// Handler worker-pool configuration
    #[serde(default)]
    pub workers: WorkerSettings,

    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Message-bus endpoints and topic names for the four message flows.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Comma-separated broker endpoints
    pub brokers: String,

    /// Topic carrying inbound registration-intent events
    pub event_topic: String,

    /// Topic the version queries are produced to
    pub query_topic: String,

    /// Topic carrying inbound version-query response batches
    pub response_topic: String,

    /// Topic the registration outcomes are produced to
    pub register_topic: String,

    /// Time-partition hint stamped on every version query
    #[serde(default = "default_year_bucket")]
    pub year_bucket: i32,
}

impl BusConfig {
    /// Parse the comma-separated broker list.
    pub fn broker_list(&self) -> Vec<String> {
        self.brokers
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Durable-store connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of pooled connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection/operation timeout in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

/// Bounds on concurrent per-message handling.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Maximum in-flight handling tasks across both consumers
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Timeout for acquiring a handler permit (milliseconds)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

// Default value functions
fn default_year_bucket() -> i32 { 2018 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 5 }
fn default_store_timeout_ms() -> u64 { 3000 }
fn default_max_in_flight() -> usize { 64 }
fn default_acquire_timeout_ms() -> u64 { 30000 }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("REGISTRAR").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment taking precedence.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("REGISTRAR").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
