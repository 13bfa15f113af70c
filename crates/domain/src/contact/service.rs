//! Contact service providing a simplified API for contact operations.

use common::AggregateId;
use event_store::EventStore;
use tracing::warn;

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::repository::{AggregateRepository, Command, CommandResult, SnapshotPolicy};

use super::{
    ChangeContactAddress, ChangeContactCity, ChangeContactCountry, ChangeContactName, Contact,
    CreateContact, DeleteContact,
};

/// Service for managing contacts.
///
/// Each method is one unit of work: load, run the domain method, save, then
/// snapshot if the configured policy says so. A failed snapshot is logged and
/// does not fail the command, since the events are already committed.
pub struct ContactService<S: EventStore> {
    repository: AggregateRepository<S, Contact>,
    snapshot_policy: SnapshotPolicy,
}

impl<S: EventStore> ContactService<S> {
    /// Creates a service that never snapshots.
    pub fn new(store: S) -> Self {
        Self::with_snapshot_policy(store, SnapshotPolicy::Never)
    }

    pub fn with_snapshot_policy(store: S, snapshot_policy: SnapshotPolicy) -> Self {
        Self {
            repository: AggregateRepository::new(store),
            snapshot_policy,
        }
    }

    pub fn repository(&self) -> &AggregateRepository<S, Contact> {
        &self.repository
    }

    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        self.snapshot_policy
    }

    /// Creates a new contact.
    ///
    /// Creating a contact whose ID is already taken fails with a concurrency
    /// conflict.
    #[tracing::instrument(skip(self), fields(contact_id = %cmd.contact_id))]
    pub async fn create_contact(
        &self,
        cmd: CreateContact,
    ) -> Result<CommandResult<Contact>, DomainError> {
        let contact = Contact::create(
            cmd.aggregate_id(),
            cmd.name,
            cmd.city,
            cmd.address,
            cmd.country,
        )?;
        let result = self.repository.create(contact).await?;
        Ok(self.after_command(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn change_contact_name(
        &self,
        cmd: ChangeContactName,
    ) -> Result<CommandResult<Contact>, DomainError> {
        let id = cmd.aggregate_id();
        let result = self
            .repository
            .execute(id, |contact: &mut Contact| contact.change_name(cmd.name))
            .await?;
        Ok(self.after_command(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn change_contact_city(
        &self,
        cmd: ChangeContactCity,
    ) -> Result<CommandResult<Contact>, DomainError> {
        let id = cmd.aggregate_id();
        let result = self
            .repository
            .execute(id, |contact: &mut Contact| contact.change_city(cmd.city))
            .await?;
        Ok(self.after_command(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn change_contact_address(
        &self,
        cmd: ChangeContactAddress,
    ) -> Result<CommandResult<Contact>, DomainError> {
        let id = cmd.aggregate_id();
        let result = self
            .repository
            .execute(id, |contact: &mut Contact| contact.change_address(cmd.address))
            .await?;
        Ok(self.after_command(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn change_contact_country(
        &self,
        cmd: ChangeContactCountry,
    ) -> Result<CommandResult<Contact>, DomainError> {
        let id = cmd.aggregate_id();
        let result = self
            .repository
            .execute(id, |contact: &mut Contact| contact.change_country(cmd.country))
            .await?;
        Ok(self.after_command(result).await)
    }

    /// Soft-deletes a contact.
    #[tracing::instrument(skip(self))]
    pub async fn delete_contact(
        &self,
        cmd: DeleteContact,
    ) -> Result<CommandResult<Contact>, DomainError> {
        let result = self
            .repository
            .execute(cmd.aggregate_id(), |contact: &mut Contact| contact.delete())
            .await?;
        Ok(self.after_command(result).await)
    }

    /// Loads a contact by ID.
    ///
    /// Returns None if the contact doesn't exist. Deleted contacts are
    /// returned with [`Contact::is_deleted`] set.
    #[tracing::instrument(skip(self))]
    pub async fn get_contact(
        &self,
        contact_id: AggregateId,
    ) -> Result<Option<Contact>, DomainError> {
        match self.repository.load(contact_id).await {
            Ok(contact) => Ok(Some(contact)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn after_command(&self, mut result: CommandResult<Contact>) -> CommandResult<Contact> {
        if let Err(e) = self
            .repository
            .maybe_snapshot(&mut result.aggregate, &self.snapshot_policy)
            .await
        {
            warn!(
                contact_id = %result.aggregate.id(),
                version = %result.new_version,
                error = %e,
                "Snapshot after command failed"
            );
        }
        result
    }
}
