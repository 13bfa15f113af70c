//! Contacts entry point.
//!
//! Picks an event store from the configuration and runs the contact
//! walkthrough against it.

mod config;
mod error;
mod scenario;

use std::process::ExitCode;
use std::sync::Arc;

use domain::ContactService;
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogFormat};
use crate::error::AppError;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Installs the Prometheus recorder behind the repository counters.
fn init_metrics() -> Result<PrometheusHandle, AppError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!("aggregate_loads_total", "Aggregates rebuilt from the store");
    metrics::describe_counter!("events_appended_total", "Events accepted by the store");
    metrics::describe_counter!(
        "concurrency_conflicts_total",
        "Appends rejected because another writer got there first"
    );
    metrics::describe_counter!("snapshots_saved_total", "Snapshots written");

    Ok(handle)
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, cancelling");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, cancelling");
        }
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn EventStore>, AppError> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresEventStore::connect(url).await?;
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL event store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("using in-memory event store");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    let metrics = init_metrics()?;
    let store = open_store(&config).await?;
    let service = ContactService::with_snapshot_policy(store, config.snapshot_policy());

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    let contact_id = scenario::run(&service, &token).await?;
    tracing::info!(%contact_id, "walkthrough finished");
    tracing::info!(metrics = %metrics.render(), "final metrics");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();
    init_tracing(&config);
    tracing::debug!(?config, "loaded configuration");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "contacts failed");
            ExitCode::FAILURE
        }
    }
}
