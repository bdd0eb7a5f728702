//! Storage availability queries and cached status refresh.

use boxrent_core::availability;
use boxrent_core::{PlaceId, RentalPeriod, StorageId, StorageStatus, StorageTypeId};
use tracing::instrument;

use super::{BatchReport, ServiceContext};
use crate::error::{AppError, Result};

/// Service for availability lookups.
pub struct AvailabilityService {
    ctx: ServiceContext,
}

impl AvailabilityService {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Number of units of `storage_type` free for the whole of `period`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the occupancies cannot be loaded.
    #[instrument(skip(self), fields(storage_type_id = %storage_type, period = %period))]
    pub async fn count_available(
        &self,
        storage_type: StorageTypeId,
        place: Option<PlaceId>,
        period: RentalPeriod,
    ) -> Result<usize> {
        let occupancies = self
            .ctx
            .repos
            .storages
            .occupancies(storage_type, place)
            .await?;
        Ok(availability::count_available(&occupancies, &period))
    }

    /// Recompute and store the unit's status for today.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown or deleted units.
    pub async fn refresh_storage_status(&self, id: StorageId) -> Result<StorageStatus> {
        refresh(&self.ctx, id).await
    }

    /// Re-derive the cached status of every live unit for today.
    ///
    /// Claims and blocks start and end as days pass without any command
    /// touching the unit, so this runs daily. Only changed units are
    /// reported.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the units cannot be loaded; failed
    /// updates are reported per unit.
    #[instrument(skip(self))]
    pub async fn refresh_storage_statuses(&self) -> Result<BatchReport> {
        let today = self.ctx.clock.today();
        let mut report = BatchReport::default();

        for occupancy in self.ctx.repos.storages.all_occupancies().await? {
            let storage = &occupancy.storage;
            let status = availability::derive_status(&occupancy, today);
            if status == storage.status {
                continue;
            }

            match self.ctx.repos.storages.update_status(storage.id, status).await {
                Ok(()) => report.success(format!(
                    "[UPDATED] storage {} ({}): {} -> {status}",
                    storage.id, storage.number, storage.status
                )),
                Err(e) => {
                    tracing::error!(storage_id = %storage.id, error = %e, "Failed to update storage status");
                    report.failure(format!("[ERROR] storage {}: {e}", storage.id));
                }
            }
        }

        tracing::info!(changed = report.succeeded, %today, "Storage statuses refreshed");
        Ok(report)
    }
}

pub(super) async fn refresh(ctx: &ServiceContext, id: StorageId) -> Result<StorageStatus> {
    let occupancy = ctx
        .repos
        .storages
        .occupancy(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("storage {id}")))?;

    let status = availability::derive_status(&occupancy, ctx.clock.today());
    if status != occupancy.storage.status {
        ctx.repos.storages.update_status(id, status).await?;
        tracing::debug!(storage_id = %id, from = %occupancy.storage.status, to = %status, "Storage status changed");
    }
    Ok(status)
}

/// Refresh the cached status after a command already committed; the cache
/// is advisory, so failures are only logged.
pub(super) async fn refresh_logged(ctx: &ServiceContext, id: StorageId) {
    if let Err(e) = refresh(ctx, id).await {
        tracing::warn!(storage_id = %id, error = %e, "Failed to refresh storage status");
    }
}
