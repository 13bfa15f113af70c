//! Contact domain events.

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events that can occur on a contact aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ContactEvent {
    ContactCreated(ContactCreatedData),
    ContactNameChanged(ContactNameChangedData),
    ContactCityChanged(ContactCityChangedData),
    ContactAddressChanged(ContactAddressChangedData),
    ContactCountryChanged(ContactCountryChangedData),
    /// Soft deletion; the stream stays and the contact is flagged.
    ContactDeleted(ContactDeletedData),
}

impl DomainEvent for ContactEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ContactEvent::ContactCreated(_) => "ContactCreated",
            ContactEvent::ContactNameChanged(_) => "ContactNameChanged",
            ContactEvent::ContactCityChanged(_) => "ContactCityChanged",
            ContactEvent::ContactAddressChanged(_) => "ContactAddressChanged",
            ContactEvent::ContactCountryChanged(_) => "ContactCountryChanged",
            ContactEvent::ContactDeleted(_) => "ContactDeleted",
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        match self {
            ContactEvent::ContactCreated(data) => data.contact_id,
            ContactEvent::ContactNameChanged(data) => data.contact_id,
            ContactEvent::ContactCityChanged(data) => data.contact_id,
            ContactEvent::ContactAddressChanged(data) => data.contact_id,
            ContactEvent::ContactCountryChanged(data) => data.contact_id,
            ContactEvent::ContactDeleted(data) => data.contact_id,
        }
    }
}

/// Data for ContactCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactCreatedData {
    pub contact_id: AggregateId,
    pub name: String,
    pub city: String,
    pub address: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactNameChangedData {
    pub contact_id: AggregateId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactCityChangedData {
    pub contact_id: AggregateId,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactAddressChangedData {
    pub contact_id: AggregateId,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactCountryChangedData {
    pub contact_id: AggregateId,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactDeletedData {
    pub contact_id: AggregateId,
}
