//! Append-only event log and snapshot storage.
//!
//! Every aggregate owns one stream of events whose versions run 1, 2, 3, ...
//! without gaps. Writers append with the version they expect the stream to be
//! at; the store refuses the append with
//! [`EventStoreError::ConcurrencyConflict`] when another writer got there first.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use snapshot::Snapshot;
pub use store::{EventStore, EventStoreExt, EventStream};
