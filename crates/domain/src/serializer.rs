//! Conversion between domain events and their stored form.

use common::AggregateId;
use event_store::{EventEnvelope, Version};
use serde::de::Error as _;

use crate::aggregate::{DomainEvent, RecordedEvent};
use crate::error::DomainError;

/// JSON serializer for domain events.
///
/// Events serialize adjacently tagged, `{"type": "<EventType>", "data": {...}}`,
/// so the payload names its own type. Decoding only accepts tags known to the
/// target event enum; anything else is an error, never skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventSerializer;

impl EventSerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize<E: DomainEvent>(&self, event: &E) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(event)
    }

    /// Decodes `bytes`, checking the embedded tag against `declared_type`.
    ///
    /// The bare payload knows nothing of its stream position, so errors are
    /// plain JSON errors. Stored events go through [`decode`](Self::decode),
    /// which reports [`DomainError::Deserialization`] with the aggregate id,
    /// version and type name.
    pub fn deserialize<E: DomainEvent>(
        &self,
        bytes: &[u8],
        declared_type: &str,
    ) -> Result<E, serde_json::Error> {
        let event: E = serde_json::from_slice(bytes)?;
        check_declared_type(&event, declared_type)?;
        Ok(event)
    }

    /// Builds the envelope the store persists for `recorded`.
    pub fn encode<E: DomainEvent>(
        &self,
        aggregate_type: &str,
        recorded: &RecordedEvent<E>,
    ) -> Result<EventEnvelope, DomainError> {
        let envelope = EventEnvelope::builder()
            .event_id(recorded.event_id())
            .aggregate_id(recorded.aggregate_id())
            .aggregate_type(aggregate_type)
            .event_type(recorded.event_type())
            .version(recorded.version())
            .timestamp(recorded.occurred_at())
            .payload(recorded.event())?
            .build();
        Ok(envelope)
    }

    /// Rebuilds a recorded event from a stored envelope.
    pub fn decode<E: DomainEvent>(
        &self,
        envelope: EventEnvelope,
    ) -> Result<RecordedEvent<E>, DomainError> {
        let EventEnvelope {
            event_id,
            event_type,
            aggregate_id,
            version,
            timestamp,
            payload,
            ..
        } = envelope;

        let fail = |source: serde_json::Error| {
            deserialization_error(aggregate_id, version, &event_type, source)
        };

        let event: E = serde_json::from_value(payload).map_err(fail)?;
        check_declared_type(&event, &event_type).map_err(fail)?;

        Ok(RecordedEvent::new(event_id, version, timestamp, event))
    }
}

fn check_declared_type<E: DomainEvent>(
    event: &E,
    declared_type: &str,
) -> Result<(), serde_json::Error> {
    if event.event_type() == declared_type {
        Ok(())
    } else {
        Err(serde_json::Error::custom(format!(
            "payload is tagged {} but was stored as {declared_type}",
            event.event_type()
        )))
    }
}

fn deserialization_error(
    aggregate_id: AggregateId,
    version: Version,
    event_type: &str,
    source: serde_json::Error,
) -> DomainError {
    DomainError::Deserialization {
        aggregate_id,
        version,
        event_type: event_type.to_string(),
        source,
    }
}
