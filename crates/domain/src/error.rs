//! Domain error types.

use common::AggregateId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::contact::ContactError;

/// Errors that can occur during domain operations.
///
/// Nothing here is retried by the domain layer. A
/// [`ConcurrencyConflict`](EventStoreError::ConcurrencyConflict) is the one
/// error a caller can recover from by reloading and running the command again.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Neither a snapshot nor any event exists for the aggregate.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// Stored history has a gap, a duplicate or a reordering.
    #[error(
        "Out of order event for aggregate {aggregate_id}: expected version {expected}, got {actual}"
    )]
    OutOfOrderEvent {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// An event or memento was handed to an aggregate it does not belong to.
    #[error("Event for aggregate {actual} applied to aggregate {expected}")]
    AggregateMismatch {
        expected: AggregateId,
        actual: AggregateId,
    },

    /// The operation needs the uncommitted buffer to be empty.
    #[error("Aggregate {aggregate_id} has {count} uncommitted events")]
    PendingChanges {
        aggregate_id: AggregateId,
        count: usize,
    },

    /// A snapshot was requested for a version the store does not hold yet.
    #[error(
        "Snapshot at version {version} of aggregate {aggregate_id} is ahead of stored version {stored}"
    )]
    SnapshotAhead {
        aggregate_id: AggregateId,
        version: Version,
        stored: Version,
    },

    #[error(
        "Cannot deserialize {event_type} at version {version} of aggregate {aggregate_id}: {source}"
    )]
    Deserialization {
        aggregate_id: AggregateId,
        version: Version,
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Corrupt snapshot at version {version} of aggregate {aggregate_id}: {source}")]
    CorruptSnapshot {
        aggregate_id: AggregateId,
        version: Version,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation was cancelled before anything was persisted.
    #[error("Operation on aggregate {aggregate_id} cancelled")]
    Cancelled { aggregate_id: AggregateId },

    #[error("Contact error: {0}")]
    Contact(#[from] ContactError),
}

impl DomainError {
    /// True when another writer won the race for the aggregate's next version.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_concurrency_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::AggregateNotFound { .. })
    }
}
