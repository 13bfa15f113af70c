//! The contact walkthrough run by the binary.

use common::AggregateId;
use domain::{
    Aggregate, ChangeContactCity, ChangeContactName, Contact, ContactService, CreateContact,
};
use event_store::EventStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;

/// Creates a contact, changes it, reloads it and provokes one concurrency
/// conflict. Returns the contact's id.
pub async fn run<S: EventStore>(
    service: &ContactService<S>,
    token: &CancellationToken,
) -> Result<AggregateId, AppError> {
    let created = service
        .create_contact(CreateContact::new("A", "X", "Y", "Z"))
        .await?;
    let id = created.aggregate.id();
    info!(contact_id = %id, version = %created.new_version, "Created contact");

    let renamed = service
        .change_contact_name(ChangeContactName::new(id, "B"))
        .await?;
    info!(
        contact_id = %id,
        version = %renamed.new_version,
        name = renamed.aggregate.name(),
        "Renamed contact"
    );

    let moved = service
        .change_contact_city(ChangeContactCity::new(id, "NewCity"))
        .await?;
    info!(
        contact_id = %id,
        version = %moved.new_version,
        city = moved.aggregate.city(),
        "Moved contact"
    );

    let repository = service.repository();
    let contact = repository.load_cancellable(id, token).await?;
    log_contact(&contact);

    let mut first = repository.load_cancellable(id, token).await?;
    let mut second = repository.load_cancellable(id, token).await?;
    first.change_address("1 Main St")?;
    second.change_address("2 Side St")?;
    repository.save_cancellable(&mut first, token).await?;
    match repository.save_cancellable(&mut second, token).await {
        Err(e) if e.is_concurrency_conflict() => {
            warn!(contact_id = %id, "Second writer lost the race, as expected");
        }
        Err(e) => return Err(e.into()),
        Ok(version) => warn!(contact_id = %id, %version, "Second writer was not rejected"),
    }

    Ok(id)
}

fn log_contact(contact: &Contact) {
    info!(
        contact_id = %contact.id(),
        version = %contact.version(),
        name = contact.name(),
        city = contact.city(),
        address = contact.address(),
        country = contact.country(),
        deleted = contact.is_deleted(),
        "Loaded contact"
    );
}
