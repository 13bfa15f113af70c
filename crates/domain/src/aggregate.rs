//! Event-sourced aggregate state machine.
//!
//! An aggregate's state is a left fold over its event history. Domain methods
//! never assign fields directly: they call [`Aggregate::raise_event`], which
//! stamps the next version, runs the aggregate's [`Aggregate::apply`] dispatch
//! and queues the event until the repository commits it. Loading replays the
//! committed history through the same dispatch.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventId, Snapshot, Version};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::DomainError;

/// Trait for domain events.
///
/// Domain events are immutable facts named in the past tense. Implementations
/// are sum types with one variant per fact; each variant names the aggregate
/// it happened to.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Debug + Send + Sync {
    /// Stable type tag, used to pick the variant when decoding.
    fn event_type(&self) -> &'static str;

    /// The aggregate this event belongs to.
    fn aggregate_id(&self) -> AggregateId;
}

/// A domain event together with its position in the aggregate's stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent<E> {
    event_id: EventId,
    version: Version,
    occurred_at: DateTime<Utc>,
    event: E,
}

impl<E: DomainEvent> RecordedEvent<E> {
    pub fn new(event_id: EventId, version: Version, occurred_at: DateTime<Utc>, event: E) -> Self {
        Self {
            event_id,
            version,
            occurred_at,
            event,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.event.aggregate_id()
    }

    pub fn into_event(self) -> E {
        self.event
    }
}

/// Bookkeeping shared by every aggregate: identity, version, the events
/// raised since the last commit and the version of the last known snapshot.
///
/// Embedded in each concrete aggregate. Its fields only change through the
/// [`Aggregate`] provided methods and the repository: outside this crate the
/// uncommitted buffer can be read but never drained.
#[derive(Debug, Clone)]
pub struct AggregateRoot<E> {
    id: AggregateId,
    version: Version,
    snapshot_version: Version,
    uncommitted: Vec<RecordedEvent<E>>,
}

impl<E> AggregateRoot<E> {
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: Version::initial(),
            snapshot_version: Version::initial(),
            uncommitted: Vec::new(),
        }
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Version of the newest snapshot this instance was seeded from or wrote.
    pub fn snapshot_version(&self) -> Version {
        self.snapshot_version
    }

    pub fn uncommitted(&self) -> &[RecordedEvent<E>] {
        &self.uncommitted
    }

    /// Version the store is at, i.e. before the uncommitted events.
    pub fn committed_version(&self) -> Version {
        self.version.rewind(self.uncommitted.len())
    }

    /// Drains the uncommitted buffer once the store has accepted it.
    pub(crate) fn take_uncommitted(&mut self) -> Vec<RecordedEvent<E>> {
        std::mem::take(&mut self.uncommitted)
    }

    /// Notes that a snapshot at `version` is now stored.
    pub(crate) fn set_snapshot_version(&mut self, version: Version) {
        self.snapshot_version = version;
    }
}

/// Captured aggregate state at one version.
///
/// Seeding a fresh instance with it and replaying the events after `version`
/// gives the same state as replaying the whole history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memento<S> {
    pub aggregate_id: AggregateId,
    pub version: Version,
    pub state: S,
}

impl<S: Serialize> Memento<S> {
    /// Converts into the stored snapshot form.
    pub fn to_snapshot(&self, aggregate_type: &str) -> Result<Snapshot, serde_json::Error> {
        Snapshot::from_state(self.aggregate_id, aggregate_type, self.version, &self.state)
    }
}

impl<S: DeserializeOwned> Memento<S> {
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_id: snapshot.aggregate_id,
            version: snapshot.version,
            state: snapshot.into_state()?,
        })
    }
}

/// Trait for aggregates in an event-sourced system.
///
/// Implementors provide the identity bookkeeping ([`root`](Self::root)), the
/// event dispatch ([`apply`](Self::apply)) and the memento hooks. Aggregates
/// are plain values owned by one unit of work at a time; they do no locking.
pub trait Aggregate: Send + Sync + Sized {
    type Event: DomainEvent;

    /// Domain fields captured by a memento.
    type State: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Aggregate type name stored alongside events and snapshots.
    fn aggregate_type() -> &'static str;

    /// A new aggregate at version 0 with no state, ready for replay.
    fn empty(id: AggregateId) -> Self;

    fn root(&self) -> &AggregateRoot<Self::Event>;

    /// The embedded root, for the provided methods below.
    fn root_mut(&mut self) -> &mut AggregateRoot<Self::Event>;

    /// Mutates state for one event.
    ///
    /// Must be deterministic and infallible: events are facts that already
    /// happened. Every variant of `Self::Event` has an arm, so there is no
    /// unregistered-event case at replay time.
    fn apply(&mut self, event: &Self::Event);

    fn capture_state(&self) -> Self::State;

    fn restore_state(&mut self, state: Self::State);

    fn id(&self) -> AggregateId {
        self.root().id
    }

    fn version(&self) -> Version {
        self.root().version
    }

    /// Events raised since the last successful save, oldest first.
    fn uncommitted_events(&self) -> &[RecordedEvent<Self::Event>] {
        &self.root().uncommitted
    }

    /// Records a new fact: assigns the next version, applies it and queues it
    /// for the repository.
    ///
    /// Fails with [`DomainError::AggregateMismatch`] when the event names a
    /// different aggregate; nothing is changed in that case.
    fn raise_event(&mut self, event: Self::Event) -> Result<(), DomainError> {
        let id = self.id();
        if event.aggregate_id() != id {
            return Err(DomainError::AggregateMismatch {
                expected: id,
                actual: event.aggregate_id(),
            });
        }

        let version = self.version().next();
        self.apply(&event);

        let root = self.root_mut();
        root.version = version;
        root.uncommitted
            .push(RecordedEvent::new(EventId::new(), version, Utc::now(), event));
        Ok(())
    }

    /// Replays committed events, oldest first.
    ///
    /// Each event must carry exactly the next version; the stored version is
    /// trusted, not reassigned, and nothing is added to the uncommitted
    /// buffer. On error the aggregate is left partially replayed and must be
    /// discarded.
    fn load_from_history<I>(&mut self, history: I) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = RecordedEvent<Self::Event>>,
    {
        let id = self.id();
        let pending = self.uncommitted_events().len();
        if pending > 0 {
            return Err(DomainError::PendingChanges {
                aggregate_id: id,
                count: pending,
            });
        }

        for recorded in history {
            if recorded.aggregate_id() != id {
                return Err(DomainError::AggregateMismatch {
                    expected: id,
                    actual: recorded.aggregate_id(),
                });
            }

            let expected = self.version().next();
            if recorded.version() != expected {
                return Err(DomainError::OutOfOrderEvent {
                    aggregate_id: id,
                    expected,
                    actual: recorded.version(),
                });
            }

            self.apply(recorded.event());
            self.root_mut().version = expected;
        }

        Ok(())
    }

    fn create_memento(&self) -> Memento<Self::State> {
        Memento {
            aggregate_id: self.id(),
            version: self.version(),
            state: self.capture_state(),
        }
    }

    /// Seeds state and version from a memento, skipping replay of every
    /// event up to and including `memento.version`.
    fn set_memento(&mut self, memento: Memento<Self::State>) -> Result<(), DomainError> {
        let id = self.id();
        if memento.aggregate_id != id {
            return Err(DomainError::AggregateMismatch {
                expected: id,
                actual: memento.aggregate_id,
            });
        }
        let pending = self.uncommitted_events().len();
        if pending > 0 {
            return Err(DomainError::PendingChanges {
                aggregate_id: id,
                count: pending,
            });
        }

        self.restore_state(memento.state);
        let root = self.root_mut();
        root.version = memento.version;
        root.snapshot_version = memento.version;
        Ok(())
    }
}
