//! Domain layer for the event-sourcing system.
//!
//! This crate provides:
//! - the [`Aggregate`] state machine and its [`AggregateRoot`] bookkeeping
//! - [`EventSerializer`] for the stored JSON form of events
//! - [`AggregateRepository`] for snapshot-aware loading and version-checked saving
//! - the `Contact` aggregate and [`ContactService`]

pub mod aggregate;
pub mod contact;
pub mod error;
pub mod repository;
pub mod serializer;

pub use aggregate::{Aggregate, AggregateRoot, DomainEvent, Memento, RecordedEvent};
pub use contact::{
    ChangeContactAddress, ChangeContactCity, ChangeContactCountry, ChangeContactName, Contact,
    ContactError, ContactEvent, ContactService, ContactState, CreateContact, DeleteContact,
};
pub use error::DomainError;
pub use repository::{AggregateRepository, Command, CommandResult, SnapshotPolicy};
pub use serializer::EventSerializer;
