//! Application error type.

use domain::DomainError;
use event_store::EventStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Metrics recorder error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}
