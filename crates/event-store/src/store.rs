use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::TryStreamExt;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version};

/// A lazily produced, finite sequence of stored events.
///
/// Each call to [`EventStore::read_events`] returns a fresh stream.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Persistence port for event-sourced aggregates.
///
/// Implementations must make [`append`](EventStore::append) a single atomic
/// check-and-append so that two writers racing from the same expected version
/// produce exactly one winner.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to the stream of `aggregate_id`, but only if the
    /// stream is currently at `expected_version`.
    ///
    /// The batch must be non-empty, belong to `aggregate_id` and carry
    /// versions `expected_version + 1, expected_version + 2, ...`. Either the
    /// whole batch is stored or none of it.
    ///
    /// Returns the version of the stream after the append.
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        events: Vec<EventEnvelope>,
    ) -> Result<Version>;

    /// Streams the events of `aggregate_id` whose version is strictly greater
    /// than `after`, oldest first.
    async fn read_events(&self, aggregate_id: AggregateId, after: Version) -> Result<EventStream>;

    /// Current version of the stream, or `None` if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Stores `snapshot` as the latest one for its aggregate.
    ///
    /// Saving the same snapshot twice is harmless. A snapshot older than the
    /// stored one is ignored.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Latest snapshot of the aggregate, if any.
    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;
}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        events: Vec<EventEnvelope>,
    ) -> Result<Version> {
        (**self).append(aggregate_id, expected_version, events).await
    }

    async fn read_events(&self, aggregate_id: AggregateId, after: Version) -> Result<EventStream> {
        (**self).read_events(aggregate_id, after).await
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        (**self).get_aggregate_version(aggregate_id).await
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        (**self).save_snapshot(snapshot).await
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        (**self).get_snapshot(aggregate_id).await
    }
}

/// Convenience methods available on every event store.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Collects the whole stream of an aggregate.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        self.read_events(aggregate_id, Version::initial())
            .await?
            .try_collect()
            .await
    }

    /// Checks if an aggregate has any events.
    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }

    /// Latest snapshot plus every event recorded after it.
    ///
    /// Without a snapshot the full stream is returned.
    async fn load_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        let snapshot = self.get_snapshot(aggregate_id).await?;
        let after = snapshot
            .as_ref()
            .map_or(Version::initial(), |snapshot| snapshot.version);
        let events = self
            .read_events(aggregate_id, after)
            .await?
            .try_collect()
            .await?;
        Ok((snapshot, events))
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks a batch against the stream invariants before it is written.
pub fn validate_events_for_append(
    aggregate_id: AggregateId,
    expected_version: Version,
    events: &[EventEnvelope],
) -> Result<()> {
    let invalid = |reason: String| EventStoreError::InvalidAppend {
        aggregate_id,
        reason,
    };

    if events.is_empty() {
        return Err(invalid("cannot append an empty event list".to_string()));
    }

    let mut next = expected_version.next();
    for event in events {
        if event.aggregate_id != aggregate_id {
            return Err(invalid(format!(
                "event {} belongs to aggregate {}",
                event.event_id, event.aggregate_id
            )));
        }
        if event.aggregate_type != events[0].aggregate_type {
            return Err(invalid(
                "all events must have the same aggregate type".to_string(),
            ));
        }
        if event.version != next {
            return Err(invalid(format!(
                "event versions must be sequential: expected {next}, got {}",
                event.version
            )));
        }
        next = next.next();
    }

    Ok(())
}
