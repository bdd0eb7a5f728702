//! Storage repository for database operations.
//!
//! Assignment locks every unit of the requested type (`FOR UPDATE`) before
//! deciding which one is free, and the exclusion constraint on
//! `rental_order` rejects any overlap that slips through.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use boxrent_core::availability;
use boxrent_core::domain::{
    Claim, ClaimSource, NewOrder, Order, Storage, StorageOccupancy, StorageType,
    UnavailabilityBlock,
};
use boxrent_core::{
    ContractId, Money, OrderId, PlaceId, RentalPeriod, StorageId, StorageStatus, StorageTypeId,
    UnavailabilityId, UserId,
};

use super::{RepositoryError, commission_rate, is_exclusion_violation, orders};
use crate::repository::StorageRepository;

macro_rules! storage_columns {
    () => {
        "id, number, coordinates, storage_type_id, place_id, owner_id, status, commission_rate"
    };
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct StorageRow {
    id: i32,
    number: String,
    coordinates: Option<String>,
    storage_type_id: i32,
    place_id: i32,
    owner_id: i32,
    status: StorageStatus,
    commission_rate: Option<Decimal>,
}

impl TryFrom<StorageRow> for Storage {
    type Error = RepositoryError;

    fn try_from(row: StorageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: StorageId::new(row.id),
            number: row.number,
            coordinates: row.coordinates,
            storage_type_id: StorageTypeId::new(row.storage_type_id),
            place_id: PlaceId::new(row.place_id),
            owner_id: UserId::new(row.owner_id),
            status: row.status,
            commission_rate: row.commission_rate.map(commission_rate).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StorageTypeRow {
    id: i32,
    place_id: i32,
    name: String,
    dimensions: Option<String>,
    price_per_month: i64,
}

impl From<StorageTypeRow> for StorageType {
    fn from(row: StorageTypeRow) -> Self {
        Self {
            id: StorageTypeId::new(row.id),
            place_id: PlaceId::new(row.place_id),
            name: row.name,
            dimensions: row.dimensions,
            price_per_month: Money::from_minor(row.price_per_month),
        }
    }
}

/// A date range held on a unit by an order, a contract or a block.
#[derive(Debug, sqlx::FromRow)]
struct RangeRow {
    id: i32,
    storage_id: i32,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
}

#[derive(Debug, sqlx::FromRow)]
struct BlockRow {
    id: i32,
    storage_id: i32,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    reason: String,
}

impl From<BlockRow> for UnavailabilityBlock {
    fn from(row: BlockRow) -> Self {
        Self {
            id: UnavailabilityId::new(row.id),
            storage_id: StorageId::new(row.storage_id),
            period: RentalPeriod::new(row.start_date, row.end_date),
            reason: row.reason,
        }
    }
}

// =============================================================================
// Shared Statements
// =============================================================================

/// Attach live claims and blocks to `storages`, keeping their order.
async fn load_occupancies(
    conn: &mut PgConnection,
    storages: Vec<Storage>,
) -> Result<Vec<StorageOccupancy>, RepositoryError> {
    let ids: Vec<i32> = storages.iter().map(|s| s.id.as_i32()).collect();

    let order_rows = sqlx::query_as::<_, RangeRow>(
        r"
        SELECT id, storage_id, start_date, end_date
        FROM rental.rental_order
        WHERE storage_id = ANY($1)
          AND status IN ('created', 'reserved', 'awaiting_payment', 'paid')
        ",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let contract_rows = sqlx::query_as::<_, RangeRow>(
        "SELECT id, storage_id, start_date, end_date FROM rental.contract WHERE storage_id = ANY($1)",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let block_rows = sqlx::query_as::<_, BlockRow>(
        r"
        SELECT id, storage_id, start_date, end_date, reason
        FROM rental.storage_unavailability
        WHERE storage_id = ANY($1)
        ",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut claims: HashMap<i32, Vec<Claim>> = HashMap::new();
    for row in order_rows {
        claims.entry(row.storage_id).or_default().push(Claim {
            source: ClaimSource::Order(OrderId::new(row.id)),
            period: RentalPeriod::new(row.start_date, row.end_date),
        });
    }
    for row in contract_rows {
        claims.entry(row.storage_id).or_default().push(Claim {
            source: ClaimSource::Contract(ContractId::new(row.id)),
            period: RentalPeriod::new(row.start_date, row.end_date),
        });
    }

    let mut blocks: HashMap<i32, Vec<UnavailabilityBlock>> = HashMap::new();
    for row in block_rows {
        blocks.entry(row.storage_id).or_default().push(row.into());
    }

    Ok(storages
        .into_iter()
        .map(|storage| StorageOccupancy {
            claims: claims.remove(&storage.id.as_i32()).unwrap_or_default(),
            blocks: blocks.remove(&storage.id.as_i32()).unwrap_or_default(),
            storage,
        })
        .collect())
}

/// Lock one live unit and load its occupancy.
async fn lock_occupancy(
    conn: &mut PgConnection,
    id: StorageId,
) -> Result<StorageOccupancy, RepositoryError> {
    let row = sqlx::query_as::<_, StorageRow>(concat!(
        "SELECT ",
        storage_columns!(),
        " FROM rental.storage WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(RepositoryError::NotFound)?;

    load_occupancies(conn, vec![row.try_into()?])
        .await?
        .pop()
        .ok_or(RepositoryError::NotFound)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for storage database operations.
pub struct PgStorageRepository {
    pool: PgPool,
}

impl PgStorageRepository {
    /// Create a new storage repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn try_reserve(
        &self,
        order: &NewOrder,
    ) -> Result<Option<(Storage, Order)>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Fixed row order keeps lock acquisition consistent across checkouts;
        // the unit itself is picked by `first_available`.
        let rows = sqlx::query_as::<_, StorageRow>(concat!(
            "SELECT ",
            storage_columns!(),
            " FROM rental.storage \
             WHERE storage_type_id = $1 AND ($2::int IS NULL OR place_id = $2) \
               AND deleted_at IS NULL \
             ORDER BY number, id \
             FOR UPDATE"
        ))
        .bind(order.storage_type_id)
        .bind(order.place_id)
        .fetch_all(&mut *tx)
        .await?;

        let storages = rows
            .into_iter()
            .map(Storage::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let occupancies = load_occupancies(&mut *tx, storages).await?;

        let Some(storage) = availability::first_available(&occupancies, &order.period).cloned()
        else {
            return Ok(None);
        };

        let reserved = order
            .clone()
            .into_reserved(OrderId::new(0), storage.id);
        let order = orders::insert_order(&mut *tx, &reserved).await?;

        tx.commit().await?;
        Ok(Some((storage, order)))
    }
}

#[async_trait]
impl StorageRepository for PgStorageRepository {
    async fn get(&self, id: StorageId) -> Result<Option<Storage>, RepositoryError> {
        let row = sqlx::query_as::<_, StorageRow>(concat!(
            "SELECT ",
            storage_columns!(),
            " FROM rental.storage WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_type(&self, id: StorageTypeId) -> Result<Option<StorageType>, RepositoryError> {
        let row = sqlx::query_as::<_, StorageTypeRow>(
            "SELECT id, place_id, name, dimensions, price_per_month FROM rental.storage_type WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn occupancies(
        &self,
        storage_type: StorageTypeId,
        place: Option<PlaceId>,
    ) -> Result<Vec<StorageOccupancy>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, StorageRow>(concat!(
            "SELECT ",
            storage_columns!(),
            " FROM rental.storage \
             WHERE storage_type_id = $1 AND ($2::int IS NULL OR place_id = $2) \
               AND deleted_at IS NULL \
             ORDER BY number, id"
        ))
        .bind(storage_type)
        .bind(place)
        .fetch_all(&mut *conn)
        .await?;

        let storages = rows
            .into_iter()
            .map(Storage::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        load_occupancies(&mut *conn, storages).await
    }

    async fn occupancy(&self, id: StorageId) -> Result<Option<StorageOccupancy>, RepositoryError> {
        let Some(storage) = self.get(id).await? else {
            return Ok(None);
        };
        let mut conn = self.pool.acquire().await?;
        Ok(load_occupancies(&mut *conn, vec![storage]).await?.pop())
    }

    async fn all_occupancies(&self) -> Result<Vec<StorageOccupancy>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, StorageRow>(concat!(
            "SELECT ",
            storage_columns!(),
            " FROM rental.storage WHERE deleted_at IS NULL ORDER BY id"
        ))
        .fetch_all(&mut *conn)
        .await?;

        let storages = rows
            .into_iter()
            .map(Storage::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        load_occupancies(&mut *conn, storages).await
    }

    async fn reserve_first_available(
        &self,
        order: NewOrder,
    ) -> Result<Option<(Storage, Order)>, RepositoryError> {
        match self.try_reserve(&order).await {
            Err(RepositoryError::Database(ref err)) if is_exclusion_violation(err) => {
                tracing::info!(
                    storage_type_id = %order.storage_type_id,
                    "Lost storage assignment race"
                );
                Ok(None)
            }
            other => other,
        }
    }

    async fn update_status(
        &self,
        id: StorageId,
        status: StorageStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE rental.storage SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_block(
        &self,
        storage_id: StorageId,
        period: RentalPeriod,
        reason: &str,
    ) -> Result<UnavailabilityBlock, RepositoryError> {
        let row = sqlx::query_as::<_, BlockRow>(
            r"
            INSERT INTO rental.storage_unavailability (storage_id, start_date, end_date, reason)
            VALUES ($1, $2, $3, $4)
            RETURNING id, storage_id, start_date, end_date, reason
            ",
        )
        .bind(storage_id)
        .bind(period.start)
        .bind(period.end)
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn remove_block(
        &self,
        id: UnavailabilityId,
    ) -> Result<Option<UnavailabilityBlock>, RepositoryError> {
        let row = sqlx::query_as::<_, BlockRow>(
            r"
            DELETE FROM rental.storage_unavailability
            WHERE id = $1
            RETURNING id, storage_id, start_date, end_date, reason
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: StorageId, today: NaiveDate) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let occupancy = lock_occupancy(&mut *tx, id).await?;
        if availability::has_claims_after(&occupancy, today) {
            return Err(RepositoryError::Conflict(format!(
                "storage {id} has rentals after {today}"
            )));
        }

        sqlx::query("UPDATE rental.storage SET deleted_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn change_type(
        &self,
        id: StorageId,
        storage_type: StorageTypeId,
        today: NaiveDate,
    ) -> Result<Storage, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let occupancy = lock_occupancy(&mut *tx, id).await?;
        if availability::has_claims_after(&occupancy, today) {
            return Err(RepositoryError::Conflict(format!(
                "storage {id} has rentals after {today}"
            )));
        }

        let type_place = sqlx::query_scalar::<_, i32>(
            "SELECT place_id FROM rental.storage_type WHERE id = $1",
        )
        .bind(storage_type)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        if PlaceId::new(type_place) != occupancy.storage.place_id {
            return Err(RepositoryError::Conflict(format!(
                "storage type {storage_type} belongs to another place"
            )));
        }

        let row = sqlx::query_as::<_, StorageRow>(concat!(
            "UPDATE rental.storage SET storage_type_id = $2 WHERE id = $1 RETURNING ",
            storage_columns!()
        ))
        .bind(id)
        .bind(storage_type)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }
}
