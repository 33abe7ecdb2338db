//! Registrar server main entry point.

use std::sync::Arc;

use registrar::auth::PgUserGateway;
use registrar::bus::local::LocalBus;
use registrar::config::Config;
use registrar::service::Service;
use registrar::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Env vars are read from the process environment when no .env exists.
    let dotenv = dotenvy::dotenv();

    // A missing required option fails here, before anything is consumed.
    let config = Config::load()?;

    telemetry::init(&config.telemetry);

    if let Err(err) = dotenv {
        tracing::info!(error = %err, ".env not loaded, using process environment");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        brokers = ?config.bus.broker_list(),
        "starting registrar"
    );

    // Store gateway: connect, then apply the baseline schema.
    let gateway = PgUserGateway::connect(&config.store).await?;
    gateway.migrate().await?;
    tracing::info!("connected to user store");
    let gateway = Arc::new(gateway);

    // In-process transport; a deployment's bus client implements the same
    // adapter contract against the configured brokers.
    let bus = LocalBus::new();

    let mut service = Service::start(&bus, gateway, &config).await?;
    tracing::info!(
        event_topic = %config.bus.event_topic,
        response_topic = %config.bus.response_topic,
        "registration pipeline started"
    );

    // Supervise: a shutdown signal drains gracefully; a publish error or a
    // dead reader task terminates the process with a non-zero status.
    let fatal = tokio::select! {
        _ = shutdown_signal() => None,
        Some(err) = service.query_errors.recv() => {
            Some(anyhow::anyhow!("version-query producer failed: {err}"))
        }
        Some(err) = service.outcome_errors.recv() => {
            Some(anyhow::anyhow!("outcome producer failed: {err}"))
        }
        _ = &mut service.resolver => {
            Some(anyhow::anyhow!("version resolver exited unexpectedly"))
        }
        _ = &mut service.correlator => {
            Some(anyhow::anyhow!("query correlator exited unexpectedly"))
        }
    };

    match fatal {
        None => {
            tracing::info!("shutdown signal received");
            service.shutdown().await;
            tracing::info!("shutdown complete");
            Ok(())
        }
        Some(err) => {
            tracing::error!(error = %err, "fatal error, terminating");
            Err(err)
        }
    }
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
