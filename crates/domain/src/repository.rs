//! Loading and saving aggregates through an event store.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{EventStore, Version};
use futures_util::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregate::{Aggregate, Memento, RecordedEvent};
use crate::error::DomainError;
use crate::serializer::EventSerializer;

/// Trait for commands that can be executed against an aggregate.
///
/// Commands represent an intention to perform an action. They may be rejected
/// if the aggregate's current state doesn't allow the action.
pub trait Command: Send + Sync {
    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;
}

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after the command, with nothing left uncommitted.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<RecordedEvent<A::Event>>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// When the repository should write a snapshot after a save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapshotPolicy {
    #[default]
    Never,
    /// Snapshot once the aggregate is at least this many events past its
    /// last snapshot.
    EveryNEvents(u64),
}

impl SnapshotPolicy {
    /// `EveryNEvents(n)`, or `Never` for `n == 0`.
    pub fn every(n: u64) -> Self {
        if n == 0 {
            SnapshotPolicy::Never
        } else {
            SnapshotPolicy::EveryNEvents(n)
        }
    }

    pub fn should_snapshot(&self, version: Version, last_snapshot: Version) -> bool {
        match *self {
            SnapshotPolicy::Never => false,
            SnapshotPolicy::EveryNEvents(0) => false,
            SnapshotPolicy::EveryNEvents(n) => {
                let n = i64::try_from(n).unwrap_or(i64::MAX);
                version.since(last_snapshot) >= n
            }
        }
    }
}

/// Rebuilds aggregates from the store and persists their new events.
///
/// Loading seeds the aggregate from the latest snapshot, if any, then replays
/// the events recorded after it. Saving appends the uncommitted events with
/// the version the aggregate was loaded at, so a concurrent writer turns the
/// second save into a [`ConcurrencyConflict`](event_store::EventStoreError::ConcurrencyConflict).
/// Snapshots are only written on request ([`maybe_snapshot`](Self::maybe_snapshot)
/// or [`snapshot`](Self::snapshot)).
pub struct AggregateRepository<S, A> {
    store: S,
    serializer: EventSerializer,
    _aggregate: PhantomData<fn() -> A>,
}

impl<S, A> AggregateRepository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            serializer: EventSerializer::new(),
            _aggregate: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from its latest snapshot and the events after it.
    ///
    /// Returns [`DomainError::AggregateNotFound`] when the aggregate has
    /// neither a snapshot nor events.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let mut aggregate = A::empty(aggregate_id);

        let snapshot = self.store.get_snapshot(aggregate_id).await?;
        let from_snapshot = snapshot.is_some();
        if let Some(snapshot) = snapshot {
            let version = snapshot.version;
            let memento = Memento::from_snapshot(snapshot).map_err(|source| {
                DomainError::CorruptSnapshot {
                    aggregate_id,
                    version,
                    source,
                }
            })?;
            aggregate.set_memento(memento)?;
        }

        let mut events = self
            .store
            .read_events(aggregate_id, aggregate.version())
            .await?;
        let mut replayed = 0usize;
        while let Some(envelope) = events.try_next().await? {
            let recorded = self.serializer.decode(envelope)?;
            aggregate.load_from_history(std::iter::once(recorded))?;
            replayed += 1;
        }

        if !from_snapshot && replayed == 0 {
            return Err(DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
            });
        }

        metrics::counter!("aggregate_loads_total").increment(1);
        debug!(
            version = %aggregate.version(),
            from_snapshot,
            replayed,
            "Loaded aggregate"
        );

        Ok(aggregate)
    }

    /// Like [`load`](Self::load), but gives up with
    /// [`DomainError::Cancelled`] once `token` is cancelled.
    pub async fn load_cancellable(
        &self,
        aggregate_id: AggregateId,
        token: &CancellationToken,
    ) -> Result<A, DomainError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(DomainError::Cancelled { aggregate_id }),
            result = self.load(aggregate_id) => result,
        }
    }

    /// Appends the aggregate's uncommitted events and returns its new version.
    ///
    /// With nothing uncommitted this is a no-op. On any error, including a
    /// concurrency conflict, the uncommitted events stay in place.
    pub async fn save(&self, aggregate: &mut A) -> Result<Version, DomainError> {
        self.commit(aggregate).await?;
        Ok(aggregate.version())
    }

    /// Like [`save`](Self::save), but refuses to start once `token` is
    /// cancelled.
    ///
    /// An append that has started always runs to completion, so a cancelled
    /// save never leaves anything persisted.
    pub async fn save_cancellable(
        &self,
        aggregate: &mut A,
        token: &CancellationToken,
    ) -> Result<Version, DomainError> {
        if token.is_cancelled() {
            return Err(DomainError::Cancelled {
                aggregate_id: aggregate.id(),
            });
        }
        self.save(aggregate).await
    }

    #[tracing::instrument(
        skip(self, aggregate),
        fields(
            aggregate_type = A::aggregate_type(),
            aggregate_id = %aggregate.id(),
            count = aggregate.uncommitted_events().len(),
        )
    )]
    async fn commit(
        &self,
        aggregate: &mut A,
    ) -> Result<Vec<RecordedEvent<A::Event>>, DomainError> {
        let pending = aggregate.uncommitted_events();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let aggregate_id = aggregate.id();
        let expected = aggregate.root().committed_version();
        let envelopes = pending
            .iter()
            .map(|recorded| self.serializer.encode(A::aggregate_type(), recorded))
            .collect::<Result<Vec<_>, _>>()?;
        let count = envelopes.len() as u64;

        match self.store.append(aggregate_id, expected, envelopes).await {
            Ok(new_version) => {
                metrics::counter!("events_appended_total").increment(count);
                debug!(%new_version, "Appended events");
                Ok(aggregate.root_mut().take_uncommitted())
            }
            Err(e) => {
                if e.is_concurrency_conflict() {
                    metrics::counter!("concurrency_conflicts_total").increment(1);
                    warn!(expected = %expected, error = %e, "Concurrent write rejected");
                }
                Err(e.into())
            }
        }
    }

    /// Writes a snapshot of the aggregate at its current version.
    ///
    /// The store must already hold every event up to that version, so a
    /// snapshot never describes state the event log cannot rebuild.
    pub async fn snapshot(&self, aggregate: &mut A) -> Result<Version, DomainError> {
        let aggregate_id = aggregate.id();
        let pending = aggregate.uncommitted_events().len();
        if pending > 0 {
            return Err(DomainError::PendingChanges {
                aggregate_id,
                count: pending,
            });
        }
        if aggregate.version().is_initial() {
            return Err(DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
            });
        }

        match self.store.get_aggregate_version(aggregate_id).await? {
            None => {
                return Err(DomainError::AggregateNotFound {
                    aggregate_type: A::aggregate_type(),
                    aggregate_id,
                });
            }
            Some(stored) if stored < aggregate.version() => {
                return Err(DomainError::SnapshotAhead {
                    aggregate_id,
                    version: aggregate.version(),
                    stored,
                });
            }
            Some(_) => {}
        }

        let memento = aggregate.create_memento();
        let version = memento.version;
        let snapshot = memento.to_snapshot(A::aggregate_type())?;
        self.store.save_snapshot(snapshot).await?;
        aggregate.root_mut().set_snapshot_version(version);

        metrics::counter!("snapshots_saved_total").increment(1);
        debug!(%aggregate_id, %version, "Saved snapshot");
        Ok(version)
    }

    /// Writes a snapshot if `policy` says the aggregate is due for one.
    ///
    /// Returns whether a snapshot was written.
    pub async fn maybe_snapshot(
        &self,
        aggregate: &mut A,
        policy: &SnapshotPolicy,
    ) -> Result<bool, DomainError> {
        let pending = aggregate.uncommitted_events().len();
        if pending > 0 {
            return Err(DomainError::PendingChanges {
                aggregate_id: aggregate.id(),
                count: pending,
            });
        }

        if !policy.should_snapshot(aggregate.version(), aggregate.root().snapshot_version()) {
            return Ok(false);
        }
        self.snapshot(aggregate).await?;
        Ok(true)
    }

    /// Loads the aggregate, runs `command` on it and saves what it raised.
    ///
    /// No retry: a concurrency conflict is returned to the caller.
    pub async fn execute<F, E>(
        &self,
        aggregate_id: AggregateId,
        command: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&mut A) -> Result<(), E>,
        DomainError: From<E>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        command(&mut aggregate)?;
        self.commit_result(aggregate).await
    }

    /// Saves a freshly created aggregate, for factories that raise the
    /// creation event themselves.
    pub async fn create(&self, aggregate: A) -> Result<CommandResult<A>, DomainError> {
        self.commit_result(aggregate).await
    }

    async fn commit_result(&self, mut aggregate: A) -> Result<CommandResult<A>, DomainError> {
        let events = self.commit(&mut aggregate).await?;
        let new_version = aggregate.version();
        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use event_store::{EventStoreExt, InMemoryEventStore};
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;
    use crate::contact::{Contact, ContactError};

    fn repository() -> AggregateRepository<Arc<InMemoryEventStore>, Contact> {
        AggregateRepository::new(Arc::new(InMemoryEventStore::new()))
    }

    fn new_contact() -> Contact {
        Contact::create(AggregateId::new(), "Ada", "London", "12 Baker St", "UK").unwrap()
    }

    #[test]
    fn snapshot_policy_thresholds() {
        let every_two = SnapshotPolicy::every(2);
        assert_eq!(every_two, SnapshotPolicy::EveryNEvents(2));
        assert!(!every_two.should_snapshot(Version::new(1), Version::initial()));
        assert!(every_two.should_snapshot(Version::new(2), Version::initial()));
        assert!(!every_two.should_snapshot(Version::new(3), Version::new(2)));
        assert!(every_two.should_snapshot(Version::new(5), Version::new(2)));

        assert_eq!(SnapshotPolicy::every(0), SnapshotPolicy::Never);
        assert!(!SnapshotPolicy::Never.should_snapshot(Version::new(100), Version::initial()));
        assert!(
            !SnapshotPolicy::EveryNEvents(0).should_snapshot(Version::new(1), Version::initial())
        );
    }

    #[tokio::test]
    async fn save_appends_and_clears_buffer() {
        let repo = repository();
        let mut contact = new_contact();
        contact.change_name("Ada L").unwrap();

        let version = repo.save(&mut contact).await.unwrap();

        assert_eq!(version, Version::new(2));
        assert!(contact.uncommitted_events().is_empty());
        let stored = repo
            .store()
            .get_events_for_aggregate(contact.id())
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].aggregate_type, "Contact");
    }

    #[tokio::test]
    async fn save_without_changes_is_noop() {
        let repo = repository();
        let mut contact = new_contact();
        repo.save(&mut contact).await.unwrap();

        let version = repo.save(&mut contact).await.unwrap();

        assert_eq!(version, Version::first());
        assert_eq!(repo.store().event_count().await, 1);
    }

    #[tokio::test]
    async fn conflicting_save_keeps_uncommitted_events() {
        let repo = repository();
        let mut contact = new_contact();
        let id = contact.id();
        repo.save(&mut contact).await.unwrap();

        let mut first = repo.load(id).await.unwrap();
        let mut second = repo.load(id).await.unwrap();
        first.change_city("Paris").unwrap();
        second.change_city("Rome").unwrap();

        repo.save(&mut first).await.unwrap();
        let err = repo.save(&mut second).await.unwrap_err();

        assert!(err.is_concurrency_conflict());
        assert_eq!(second.uncommitted_events().len(), 1);
        assert_eq!(repo.load(id).await.unwrap().city(), "Paris");
    }

    #[tokio::test]
    async fn load_unknown_aggregate_is_not_found() {
        let repo = repository();
        let err = repo.load(AggregateId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn load_uses_snapshot_and_tail() {
        let repo = repository();
        let mut contact = new_contact();
        let id = contact.id();
        contact.change_name("B").unwrap();
        repo.save(&mut contact).await.unwrap();
        assert_eq!(repo.snapshot(&mut contact).await.unwrap(), Version::new(2));

        contact.change_city("NewCity").unwrap();
        repo.save(&mut contact).await.unwrap();

        let loaded = repo.load(id).await.unwrap();
        assert_eq!(loaded.name(), "B");
        assert_eq!(loaded.city(), "NewCity");
        assert_eq!(loaded.version(), Version::new(3));
        assert_eq!(loaded.root().snapshot_version(), Version::new(2));
    }

    #[tokio::test]
    async fn snapshot_refuses_pending_changes() {
        let repo = repository();
        let mut contact = new_contact();

        let err = repo.snapshot(&mut contact).await.unwrap_err();
        assert!(matches!(err, DomainError::PendingChanges { count: 1, .. }));

        let err = repo
            .maybe_snapshot(&mut contact, &SnapshotPolicy::every(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PendingChanges { .. }));
    }

    #[tokio::test]
    async fn snapshot_requires_persisted_history() {
        let repo = repository();
        let unsaved = new_contact();
        let id = unsaved.id();

        let mut forged = Contact::empty(id);
        forged.set_memento(unsaved.create_memento()).unwrap();
        let err = repo.snapshot(&mut forged).await.unwrap_err();
        assert!(err.is_not_found());

        let mut contact = new_contact();
        repo.save(&mut contact).await.unwrap();
        contact.change_name("B").unwrap();
        let mut ahead = Contact::empty(contact.id());
        ahead.set_memento(contact.create_memento()).unwrap();
        let err = repo.snapshot(&mut ahead).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::SnapshotAhead { version, stored, .. }
                if version == Version::new(2) && stored == Version::first()
        ));

        assert_eq!(repo.store().snapshot_count().await, 0);
        assert!(repo.load(id).await.unwrap_err().is_not_found());
    }

    #[test]
    fn conflict_is_counted() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                let repo = repository();
                let mut contact = new_contact();
                let id = contact.id();
                repo.save(&mut contact).await.unwrap();

                let mut first = repo.load(id).await.unwrap();
                let mut second = repo.load(id).await.unwrap();
                first.change_city("Paris").unwrap();
                second.change_city("Rome").unwrap();
                repo.save(&mut first).await.unwrap();
                assert!(repo.save(&mut second).await.is_err());
            })
        });

        let counters: Vec<(String, DebugValue)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| (key.key().name().to_string(), value))
            .collect();
        let value_of = |name: &str| {
            counters
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| match value {
                    // DebugValue does not implement Clone; copy it by hand.
                    DebugValue::Counter(v) => DebugValue::Counter(*v),
                    DebugValue::Gauge(v) => DebugValue::Gauge(*v),
                    DebugValue::Histogram(v) => DebugValue::Histogram(v.clone()),
                })
        };

        assert_eq!(
            value_of("concurrency_conflicts_total"),
            Some(DebugValue::Counter(1))
        );
        assert_eq!(value_of("events_appended_total"), Some(DebugValue::Counter(2)));
        assert_eq!(value_of("aggregate_loads_total"), Some(DebugValue::Counter(2)));
    }

    #[tokio::test]
    async fn maybe_snapshot_follows_policy() {
        let repo = repository();
        let mut contact = new_contact();
        let id = contact.id();
        repo.save(&mut contact).await.unwrap();

        let policy = SnapshotPolicy::every(2);
        assert!(!repo.maybe_snapshot(&mut contact, &policy).await.unwrap());

        contact.change_name("B").unwrap();
        repo.save(&mut contact).await.unwrap();
        assert!(repo.maybe_snapshot(&mut contact, &policy).await.unwrap());
        assert!(!repo.maybe_snapshot(&mut contact, &policy).await.unwrap());

        let snapshot = repo.store().get_snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.version, Version::new(2));
    }

    #[tokio::test]
    async fn execute_runs_command_and_saves() {
        let repo = repository();
        let mut contact = new_contact();
        let id = contact.id();
        repo.save(&mut contact).await.unwrap();

        let result = repo
            .execute(id, |contact: &mut Contact| contact.change_country("France"))
            .await
            .unwrap();

        assert_eq!(result.new_version, Version::new(2));
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].event_type(), "ContactCountryChanged");
        assert_eq!(result.aggregate.country(), "France");
    }

    #[tokio::test]
    async fn execute_propagates_domain_rejection() {
        let repo = repository();
        let mut contact = new_contact();
        let id = contact.id();
        contact.delete().unwrap();
        repo.save(&mut contact).await.unwrap();

        let err = repo
            .execute(id, |contact: &mut Contact| contact.change_name("B"))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Contact(ContactError::Deleted)));
        assert_eq!(repo.store().event_count().await, 2);
    }

    #[tokio::test]
    async fn cancelled_save_persists_nothing() {
        let repo = repository();
        let mut contact = new_contact();
        let token = CancellationToken::new();
        token.cancel();

        let err = repo.save_cancellable(&mut contact, &token).await.unwrap_err();

        assert!(matches!(err, DomainError::Cancelled { .. }));
        assert_eq!(contact.uncommitted_events().len(), 1);
        assert_eq!(repo.store().event_count().await, 0);
    }

    #[tokio::test]
    async fn cancellable_load_honours_token() {
        let repo = repository();
        let mut contact = new_contact();
        let id = contact.id();
        repo.save(&mut contact).await.unwrap();

        let live = CancellationToken::new();
        let loaded = repo.load_cancellable(id, &live).await.unwrap();
        assert_eq!(loaded.version(), Version::first());

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = repo.load_cancellable(id, &cancelled).await.unwrap_err();
        assert!(matches!(err, DomainError::Cancelled { aggregate_id } if aggregate_id == id));
    }
}
