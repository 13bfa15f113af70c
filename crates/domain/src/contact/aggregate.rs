//! Contact aggregate implementation.

use common::AggregateId;

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::error::DomainError;

use super::events::{
    ContactAddressChangedData, ContactCityChangedData, ContactCountryChangedData,
    ContactCreatedData, ContactDeletedData, ContactNameChangedData,
};
use super::{ContactError, ContactEvent, ContactState};

/// Contact aggregate root.
///
/// A person's name and postal location. Deleting a contact is a soft delete:
/// the history stays and every later change is rejected.
#[derive(Debug, Clone)]
pub struct Contact {
    root: AggregateRoot<ContactEvent>,
    state: ContactState,
}

impl Aggregate for Contact {
    type Event = ContactEvent;
    type State = ContactState;

    fn aggregate_type() -> &'static str {
        "Contact"
    }

    fn empty(id: AggregateId) -> Self {
        Self {
            root: AggregateRoot::new(id),
            state: ContactState::default(),
        }
    }

    fn root(&self) -> &AggregateRoot<ContactEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot<ContactEvent> {
        &mut self.root
    }

    fn apply(&mut self, event: &ContactEvent) {
        match event {
            ContactEvent::ContactCreated(data) => {
                self.state = ContactState {
                    name: data.name.clone(),
                    city: data.city.clone(),
                    address: data.address.clone(),
                    country: data.country.clone(),
                    deleted: false,
                };
            }
            ContactEvent::ContactNameChanged(data) => self.state.name = data.name.clone(),
            ContactEvent::ContactCityChanged(data) => self.state.city = data.city.clone(),
            ContactEvent::ContactAddressChanged(data) => {
                self.state.address = data.address.clone();
            }
            ContactEvent::ContactCountryChanged(data) => {
                self.state.country = data.country.clone();
            }
            ContactEvent::ContactDeleted(_) => self.state.deleted = true,
        }
    }

    fn capture_state(&self) -> ContactState {
        self.state.clone()
    }

    fn restore_state(&mut self, state: ContactState) {
        self.state = state;
    }
}

// Query methods
impl Contact {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn city(&self) -> &str {
        &self.state.city
    }

    pub fn address(&self) -> &str {
        &self.state.address
    }

    pub fn country(&self) -> &str {
        &self.state.country
    }

    pub fn is_deleted(&self) -> bool {
        self.state.deleted
    }

    pub fn state(&self) -> &ContactState {
        &self.state
    }
}

// Command methods
impl Contact {
    /// Creates a contact, raising `ContactCreated` as version 1.
    pub fn create(
        id: AggregateId,
        name: impl Into<String>,
        city: impl Into<String>,
        address: impl Into<String>,
        country: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        ensure_named(&name)?;

        let mut contact = Self::empty(id);
        contact.raise_event(ContactEvent::ContactCreated(ContactCreatedData {
            contact_id: id,
            name,
            city: city.into(),
            address: address.into(),
            country: country.into(),
        }))?;
        Ok(contact)
    }

    pub fn change_name(&mut self, name: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_active()?;
        let name = name.into();
        ensure_named(&name)?;
        if name == self.state.name {
            return Ok(());
        }

        let contact_id = self.id();
        self.raise_event(ContactEvent::ContactNameChanged(ContactNameChangedData {
            contact_id,
            name,
        }))
    }

    pub fn change_city(&mut self, city: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_active()?;
        let city = city.into();
        if city == self.state.city {
            return Ok(());
        }

        let contact_id = self.id();
        self.raise_event(ContactEvent::ContactCityChanged(ContactCityChangedData {
            contact_id,
            city,
        }))
    }

    pub fn change_address(&mut self, address: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_active()?;
        let address = address.into();
        if address == self.state.address {
            return Ok(());
        }

        let contact_id = self.id();
        self.raise_event(ContactEvent::ContactAddressChanged(
            ContactAddressChangedData {
                contact_id,
                address,
            },
        ))
    }

    pub fn change_country(&mut self, country: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_active()?;
        let country = country.into();
        if country == self.state.country {
            return Ok(());
        }

        let contact_id = self.id();
        self.raise_event(ContactEvent::ContactCountryChanged(
            ContactCountryChangedData {
                contact_id,
                country,
            },
        ))
    }

    /// Soft-deletes the contact.
    pub fn delete(&mut self) -> Result<(), DomainError> {
        self.ensure_active()?;
        let contact_id = self.id();
        self.raise_event(ContactEvent::ContactDeleted(ContactDeletedData {
            contact_id,
        }))
    }

    fn ensure_active(&self) -> Result<(), ContactError> {
        if self.state.deleted {
            Err(ContactError::Deleted)
        } else {
            Ok(())
        }
    }
}

fn ensure_named(name: &str) -> Result<(), ContactError> {
    if name.trim().is_empty() {
        Err(ContactError::BlankName)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use event_store::Version;

    use super::*;

    fn create_test_contact() -> Contact {
        Contact::create(AggregateId::new(), "A", "X", "Y", "Z").unwrap()
    }

    #[test]
    fn test_create_raises_created_event() {
        let contact = create_test_contact();

        assert_eq!(contact.version(), Version::first());
        assert_eq!(contact.name(), "A");
        assert_eq!(contact.city(), "X");
        assert_eq!(contact.address(), "Y");
        assert_eq!(contact.country(), "Z");
        assert!(!contact.is_deleted());

        let events = contact.uncommitted_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "ContactCreated");
        assert_eq!(events[0].aggregate_id(), contact.id());
    }

    #[test]
    fn test_create_rejects_blank_name() {
        let result = Contact::create(AggregateId::new(), "   ", "X", "Y", "Z");
        assert!(matches!(
            result,
            Err(DomainError::Contact(ContactError::BlankName))
        ));
    }

    #[test]
    fn test_change_name() {
        let mut contact = create_test_contact();
        contact.change_name("B").unwrap();

        assert_eq!(contact.name(), "B");
        assert_eq!(contact.version(), Version::new(2));
        assert_eq!(contact.uncommitted_events().len(), 2);
    }

    #[test]
    fn test_change_name_rejects_blank() {
        let mut contact = create_test_contact();
        let result = contact.change_name("");

        assert!(matches!(
            result,
            Err(DomainError::Contact(ContactError::BlankName))
        ));
        assert_eq!(contact.version(), Version::first());
    }

    #[test]
    fn test_unchanged_value_raises_nothing() {
        let mut contact = create_test_contact();
        contact.change_name("A").unwrap();
        contact.change_city("X").unwrap();
        contact.change_address("Y").unwrap();
        contact.change_country("Z").unwrap();

        assert_eq!(contact.version(), Version::first());
        assert_eq!(contact.uncommitted_events().len(), 1);
    }

    #[test]
    fn test_change_location_fields() {
        let mut contact = create_test_contact();
        contact.change_city("NewCity").unwrap();
        contact.change_address("1 Main St").unwrap();
        contact.change_country("Spain").unwrap();

        assert_eq!(contact.city(), "NewCity");
        assert_eq!(contact.address(), "1 Main St");
        assert_eq!(contact.country(), "Spain");
        assert_eq!(contact.version(), Version::new(4));

        let types: Vec<_> = contact
            .uncommitted_events()
            .iter()
            .map(|e| e.event_type())
            .collect();
        assert_eq!(
            types,
            vec![
                "ContactCreated",
                "ContactCityChanged",
                "ContactAddressChanged",
                "ContactCountryChanged"
            ]
        );
    }

    #[test]
    fn test_deleted_contact_rejects_changes() {
        let mut contact = create_test_contact();
        contact.delete().unwrap();
        assert!(contact.is_deleted());

        for result in [
            contact.change_name("B"),
            contact.change_city("C"),
            contact.change_address("D"),
            contact.change_country("E"),
            contact.delete(),
        ] {
            assert!(matches!(
                result,
                Err(DomainError::Contact(ContactError::Deleted))
            ));
        }
        assert_eq!(contact.version(), Version::new(2));
    }

    #[test]
    fn test_replay_matches_live_state() {
        let mut contact = create_test_contact();
        contact.change_name("B").unwrap();
        contact.delete().unwrap();
        let expected = contact.state().clone();
        let history = contact.uncommitted_events().to_vec();

        let mut replayed = Contact::empty(contact.id());
        replayed.load_from_history(history).unwrap();

        assert_eq!(replayed.state(), &expected);
        assert_eq!(replayed.version(), Version::new(3));
    }
}
