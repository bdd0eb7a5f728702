//! Landlord administration of storage units.

use chrono::NaiveDate;
use tracing::instrument;

use boxrent_core::access::{Action, Actor, Subject};
use boxrent_core::domain::{Storage, UnavailabilityBlock};
use boxrent_core::{RentalPeriod, StorageId, StorageTypeId, UnavailabilityId};

use super::{ServiceContext, authorize, availability};
use crate::error::{AppError, Result};

/// Service for unit maintenance: blocks, deletion and type changes.
pub struct StorageAdminService {
    ctx: ServiceContext,
}

impl StorageAdminService {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Take a unit out of rental for `[start, end)`, open-ended without `end`.
    ///
    /// Existing rentals are not affected; the block only stops new ones.
    ///
    /// # Errors
    ///
    /// - `AppError::BadRequest` if `end` is not after `start`
    /// - `AppError::Forbidden` unless the actor owns the unit
    #[instrument(skip(self, actor, reason), fields(actor_id = %actor.id))]
    pub async fn block_storage(
        &self,
        storage_id: StorageId,
        start: NaiveDate,
        end: Option<NaiveDate>,
        reason: &str,
        actor: &Actor,
    ) -> Result<UnavailabilityBlock> {
        if end.is_some_and(|end| end <= start) {
            return Err(AppError::BadRequest(
                "block must end after it starts".to_string(),
            ));
        }
        let storage = self.load(storage_id).await?;
        authorize(actor, Action::Edit, Subject::Storage(&storage))?;

        let block = self
            .ctx
            .repos
            .storages
            .add_block(storage_id, RentalPeriod::new(start, end), reason)
            .await?;
        availability::refresh_logged(&self.ctx, storage_id).await;

        tracing::info!(block_id = %block.id, period = %block.period, "Storage blocked");
        Ok(block)
    }

    /// Remove a block.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for an unknown block
    /// - `AppError::Forbidden` unless the actor owns the unit
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn unblock_storage(
        &self,
        storage_id: StorageId,
        block_id: UnavailabilityId,
        actor: &Actor,
    ) -> Result<UnavailabilityBlock> {
        let occupancy = self
            .ctx
            .repos
            .storages
            .occupancy(storage_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("storage {storage_id}")))?;
        authorize(actor, Action::Edit, Subject::Storage(&occupancy.storage))?;
        if !occupancy.blocks.iter().any(|block| block.id == block_id) {
            return Err(AppError::NotFound(format!(
                "block {block_id} on storage {storage_id}"
            )));
        }

        let block = self
            .ctx
            .repos
            .storages
            .remove_block(block_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("block {block_id}")))?;
        availability::refresh_logged(&self.ctx, block.storage_id).await;

        tracing::info!(block_id = %block.id, "Storage unblocked");
        Ok(block)
    }

    /// Delete a unit nobody rents past today.
    ///
    /// # Errors
    ///
    /// - `AppError::StorageCannotBeDeleted` if a rental reaches past today
    /// - `AppError::Forbidden` unless the actor owns the unit
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn delete_storage(&self, storage_id: StorageId, actor: &Actor) -> Result<()> {
        let storage = self.load(storage_id).await?;
        authorize(actor, Action::Delete, Subject::Storage(&storage))?;

        match self
            .ctx
            .repos
            .storages
            .delete(storage_id, self.ctx.clock.today())
            .await
            .map_err(AppError::from)
        {
            Ok(()) => {
                tracing::info!(storage = %storage.number, "Storage deleted");
                Ok(())
            }
            Err(AppError::Conflict(reason)) => Err(AppError::StorageCannotBeDeleted(reason)),
            Err(e) => Err(e),
        }
    }

    /// Move a unit to another storage type of the same place.
    ///
    /// # Errors
    ///
    /// - `AppError::StorageCannotBeReassigned` if a rental reaches past today
    ///   or the type belongs to another place
    /// - `AppError::Forbidden` unless the actor owns the unit
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn change_storage_type(
        &self,
        storage_id: StorageId,
        storage_type: StorageTypeId,
        actor: &Actor,
    ) -> Result<Storage> {
        let storage = self.load(storage_id).await?;
        authorize(actor, Action::Edit, Subject::Storage(&storage))?;

        let storage = match self
            .ctx
            .repos
            .storages
            .change_type(storage_id, storage_type, self.ctx.clock.today())
            .await
            .map_err(AppError::from)
        {
            Ok(storage) => storage,
            Err(AppError::Conflict(reason)) => {
                return Err(AppError::StorageCannotBeReassigned(reason));
            }
            Err(e) => return Err(e),
        };

        tracing::info!(storage = %storage.number, %storage_type, "Storage type changed");
        Ok(storage)
    }

    async fn load(&self, id: StorageId) -> Result<Storage> {
        self.ctx
            .repos
            .storages
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("storage {id}")))
    }
}
