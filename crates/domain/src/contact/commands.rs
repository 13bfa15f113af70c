//! Contact commands.

use common::AggregateId;

use crate::repository::Command;

/// Command to create a new contact.
#[derive(Debug, Clone)]
pub struct CreateContact {
    pub contact_id: AggregateId,
    pub name: String,
    pub city: String,
    pub address: String,
    pub country: String,
}

impl CreateContact {
    /// Creates a new CreateContact command with a generated contact ID.
    pub fn new(
        name: impl Into<String>,
        city: impl Into<String>,
        address: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            contact_id: AggregateId::new(),
            name: name.into(),
            city: city.into(),
            address: address.into(),
            country: country.into(),
        }
    }

    pub fn with_id(mut self, contact_id: AggregateId) -> Self {
        self.contact_id = contact_id;
        self
    }
}

impl Command for CreateContact {
    fn aggregate_id(&self) -> AggregateId {
        self.contact_id
    }
}

/// Command to rename a contact.
#[derive(Debug, Clone)]
pub struct ChangeContactName {
    pub contact_id: AggregateId,
    pub name: String,
}

impl ChangeContactName {
    pub fn new(contact_id: AggregateId, name: impl Into<String>) -> Self {
        Self {
            contact_id,
            name: name.into(),
        }
    }
}

impl Command for ChangeContactName {
    fn aggregate_id(&self) -> AggregateId {
        self.contact_id
    }
}

#[derive(Debug, Clone)]
pub struct ChangeContactCity {
    pub contact_id: AggregateId,
    pub city: String,
}

impl ChangeContactCity {
    pub fn new(contact_id: AggregateId, city: impl Into<String>) -> Self {
        Self {
            contact_id,
            city: city.into(),
        }
    }
}

impl Command for ChangeContactCity {
    fn aggregate_id(&self) -> AggregateId {
        self.contact_id
    }
}

#[derive(Debug, Clone)]
pub struct ChangeContactAddress {
    pub contact_id: AggregateId,
    pub address: String,
}

impl ChangeContactAddress {
    pub fn new(contact_id: AggregateId, address: impl Into<String>) -> Self {
        Self {
            contact_id,
            address: address.into(),
        }
    }
}

impl Command for ChangeContactAddress {
    fn aggregate_id(&self) -> AggregateId {
        self.contact_id
    }
}

#[derive(Debug, Clone)]
pub struct ChangeContactCountry {
    pub contact_id: AggregateId,
    pub country: String,
}

impl ChangeContactCountry {
    pub fn new(contact_id: AggregateId, country: impl Into<String>) -> Self {
        Self {
            contact_id,
            country: country.into(),
        }
    }
}

impl Command for ChangeContactCountry {
    fn aggregate_id(&self) -> AggregateId {
        self.contact_id
    }
}

/// Command to soft-delete a contact.
#[derive(Debug, Clone)]
pub struct DeleteContact {
    pub contact_id: AggregateId,
}

impl DeleteContact {
    pub fn new(contact_id: AggregateId) -> Self {
        Self { contact_id }
    }
}

impl Command for DeleteContact {
    fn aggregate_id(&self) -> AggregateId {
        self.contact_id
    }
}
