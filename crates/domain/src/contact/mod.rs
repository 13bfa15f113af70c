//! Contact aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;

pub use aggregate::Contact;
pub use commands::*;
pub use events::{
    ContactAddressChangedData, ContactCityChangedData, ContactCountryChangedData,
    ContactCreatedData, ContactDeletedData, ContactEvent, ContactNameChangedData,
};
pub use service::ContactService;
pub use state::ContactState;

use thiserror::Error;

/// Errors that can occur during contact operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactError {
    /// A contact must have a non-blank name.
    #[error("Contact name must not be blank")]
    BlankName,

    /// The contact was deleted and accepts no further changes.
    #[error("Contact is deleted")]
    Deleted,
}
