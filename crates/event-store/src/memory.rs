use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version,
    store::{EventStore, EventStream, validate_events_for_append},
};

/// In-memory event store.
///
/// Keeps one vector per aggregate stream. The version check and the append
/// happen under the same write lock, which gives the same single-winner
/// guarantee as the unique `(aggregate_id, version)` constraint in
/// PostgreSQL. Cloning shares the underlying storage.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<AggregateId, Vec<EventEnvelope>>>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all streams.
    pub async fn event_count(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }

    /// Number of stored snapshots.
    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Number of aggregate streams holding at least one event.
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        events: Vec<EventEnvelope>,
    ) -> Result<Version> {
        validate_events_for_append(aggregate_id, expected_version, &events)?;

        let mut streams = self.streams.write().await;
        let current_version = streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map_or(Version::initial(), |e| e.version);
        if current_version != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        let new_version = events.last().map_or(current_version, |e| e.version);
        streams.entry(aggregate_id).or_default().extend(events);

        Ok(new_version)
    }

    async fn read_events(&self, aggregate_id: AggregateId, after: Version) -> Result<EventStream> {
        let streams = self.streams.read().await;
        let events: Vec<EventEnvelope> = streams
            .get(&aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.version > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        match snapshots.get(&snapshot.aggregate_id) {
            Some(existing) if existing.version > snapshot.version => {}
            _ => {
                snapshots.insert(snapshot.aggregate_id, snapshot);
            }
        }
        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().await.get(&aggregate_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::EventStoreExt;

    fn create_test_event(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Contact")
            .event_type(event_type)
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"test": true}))
            .build()
    }

    #[tokio::test]
    async fn append_to_new_stream() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let version = store
            .append(
                id,
                Version::initial(),
                vec![create_test_event(id, 1, "ContactCreated")],
            )
            .await
            .unwrap();

        assert_eq!(version, Version::first());
        assert_eq!(store.get_events_for_aggregate(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_batch_returns_last_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let events = vec![
            create_test_event(id, 1, "ContactCreated"),
            create_test_event(id, 2, "ContactNameChanged"),
            create_test_event(id, 3, "ContactCityChanged"),
        ];

        let version = store.append(id, Version::initial(), events).await.unwrap();
        assert_eq!(version, Version::new(3));
        assert_eq!(store.event_count().await, 3);
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(
                id,
                Version::initial(),
                vec![create_test_event(id, 1, "ContactCreated")],
            )
            .await
            .unwrap();

        // A second writer that also believed the stream was empty.
        let result = store
            .append(
                id,
                Version::initial(),
                vec![create_test_event(id, 1, "ContactCreated")],
            )
            .await;

        match result {
            Err(EventStoreError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Version::initial());
                assert_eq!(actual, Version::first());
            }
            other => panic!("expected a concurrency conflict, got {other:?}"),
        }
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn rejected_append_to_unknown_stream_creates_nothing() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let result = store
            .append(
                id,
                Version::new(3),
                vec![create_test_event(id, 4, "ContactNameChanged")],
            )
            .await;

        assert!(result.unwrap_err().is_concurrency_conflict());
        assert_eq!(store.stream_count().await, 0);
        assert_eq!(store.get_aggregate_version(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn conflicting_append_stores_nothing() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(
                id,
                Version::initial(),
                vec![
                    create_test_event(id, 1, "ContactCreated"),
                    create_test_event(id, 2, "ContactNameChanged"),
                ],
            )
            .await
            .unwrap();

        let result = store
            .append(
                id,
                Version::first(),
                vec![
                    create_test_event(id, 2, "ContactCityChanged"),
                    create_test_event(id, 3, "ContactCountryChanged"),
                ],
            )
            .await;

        assert!(result.unwrap_err().is_concurrency_conflict());
        let stored = store.get_events_for_aggregate(id).await.unwrap();
        let versions: Vec<_> = stored.iter().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn concurrent_writers_produce_single_winner() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append(
                        id,
                        Version::initial(),
                        vec![create_test_event(id, 1, "ContactCreated")],
                    )
                    .await
            }));
        }

        let mut won = 0;
        let mut conflicted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(e) if e.is_concurrency_conflict() => conflicted += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(won, 1);
        assert_eq!(conflicted, 7);
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn read_events_is_exclusive_and_ordered() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let events = (1..=4)
            .map(|v| create_test_event(id, v, "ContactNameChanged"))
            .collect();
        store.append(id, Version::initial(), events).await.unwrap();

        let tail: Vec<_> = store
            .read_events(id, Version::new(2))
            .await
            .unwrap()
            .map(|e| e.unwrap().version.as_i64())
            .collect()
            .await;
        assert_eq!(tail, vec![3, 4]);

        let none: Vec<_> = store
            .read_events(id, Version::new(4))
            .await
            .unwrap()
            .collect()
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn read_events_can_be_called_repeatedly() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(
                id,
                Version::initial(),
                vec![create_test_event(id, 1, "ContactCreated")],
            )
            .await
            .unwrap();

        for _ in 0..2 {
            let count = store
                .read_events(id, Version::initial())
                .await
                .unwrap()
                .count()
                .await;
            assert_eq!(count, 1);
        }
    }

    #[tokio::test]
    async fn streams_are_independent() {
        let store = InMemoryEventStore::new();
        let first = AggregateId::new();
        let second = AggregateId::new();

        store
            .append(
                first,
                Version::initial(),
                vec![create_test_event(first, 1, "ContactCreated")],
            )
            .await
            .unwrap();
        store
            .append(
                second,
                Version::initial(),
                vec![create_test_event(second, 1, "ContactCreated")],
            )
            .await
            .unwrap();

        assert_eq!(
            store.get_aggregate_version(first).await.unwrap(),
            Some(Version::first())
        );
        assert_eq!(store.get_events_for_aggregate(second).await.unwrap().len(), 1);
        assert!(!store.aggregate_exists(AggregateId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn snapshot_upsert_keeps_latest() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let v5 = Snapshot::new(id, "Contact", Version::new(5), serde_json::json!({"v": 5}));
        let v3 = Snapshot::new(id, "Contact", Version::new(3), serde_json::json!({"v": 3}));

        store.save_snapshot(v5.clone()).await.unwrap();
        store.save_snapshot(v5.clone()).await.unwrap();
        store.save_snapshot(v3).await.unwrap();

        let latest = store.get_snapshot(id).await.unwrap().unwrap();
        assert_eq!(latest.version, Version::new(5));
        assert_eq!(store.snapshot_count().await, 1);
    }

    #[tokio::test]
    async fn load_aggregate_returns_tail_after_snapshot() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let events = (1..=3)
            .map(|v| create_test_event(id, v, "ContactNameChanged"))
            .collect();
        store.append(id, Version::initial(), events).await.unwrap();
        store
            .save_snapshot(Snapshot::new(
                id,
                "Contact",
                Version::new(2),
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        let (snapshot, tail) = store.load_aggregate(id).await.unwrap();
        assert_eq!(snapshot.unwrap().version, Version::new(2));
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].version, Version::new(3));
    }
}
