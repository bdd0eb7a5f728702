//! Order repository for database operations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

use boxrent_core::domain::{NewContract, NewPayment, Order, OrderSignature};
use boxrent_core::{
    GatewayPaymentId, Money, OrderId, OrderStatus, PaymentFrequency, RentalPeriod, RentalType,
    StorageId, UserId,
};

use super::{RepositoryError, contracts, map_constraint, payments};
use crate::repository::{CompletedOrder, OrderRepository};

macro_rules! order_columns {
    () => {
        "id, user_id, storage_id, rental_type, payment_frequency, start_date, end_date, \
         total_price, status, expires_at, gopay_payment_id, gopay_parent_payment_id, \
         signer_name, signed_at, signature_image, created_at, updated_at, version"
    };
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i32,
    user_id: i32,
    storage_id: i32,
    rental_type: RentalType,
    payment_frequency: PaymentFrequency,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    total_price: i64,
    status: OrderStatus,
    expires_at: Option<DateTime<Utc>>,
    gopay_payment_id: Option<i64>,
    gopay_parent_payment_id: Option<i64>,
    signer_name: Option<String>,
    signed_at: Option<DateTime<Utc>>,
    signature_image: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i32,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let period = RentalPeriod::for_rental(row.rental_type, row.start_date, row.end_date)
            .map_err(|e| {
                RepositoryError::DataCorruption(format!("order {} has {e}", row.id))
            })?;

        let signature = match (row.signer_name, row.signed_at, row.signature_image) {
            (Some(signer_name), Some(signed_at), Some(image_ref)) => Some(OrderSignature {
                signer_name,
                signed_at,
                image_ref,
            }),
            (None, None, None) => None,
            _ => {
                return Err(RepositoryError::DataCorruption(format!(
                    "order {} has a partial signature",
                    row.id
                )));
            }
        };

        Ok(Self {
            id: OrderId::new(row.id),
            user_id: UserId::new(row.user_id),
            storage_id: StorageId::new(row.storage_id),
            rental_type: row.rental_type,
            payment_frequency: row.payment_frequency,
            period,
            total_price: Money::from_minor(row.total_price),
            status: row.status,
            expires_at: row.expires_at,
            gateway_payment_id: row.gopay_payment_id.map(GatewayPaymentId::new),
            gateway_parent_payment_id: row.gopay_parent_payment_id.map(GatewayPaymentId::new),
            signature,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

// =============================================================================
// Shared Statements
// =============================================================================

/// Insert a freshly reserved order; its id and version are assigned here.
///
/// Database errors are returned unmapped so callers can recognise the
/// exclusion constraint.
pub(super) async fn insert_order(
    conn: &mut PgConnection,
    order: &Order,
) -> Result<Order, RepositoryError> {
    let signature = order.signature.as_ref();
    let row = sqlx::query_as::<_, OrderRow>(concat!(
        "INSERT INTO rental.rental_order (user_id, storage_id, rental_type, payment_frequency, \
         start_date, end_date, total_price, status, expires_at, signer_name, signed_at, \
         signature_image, created_at, updated_at, version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 0) \
         RETURNING ",
        order_columns!()
    ))
    .bind(order.user_id)
    .bind(order.storage_id)
    .bind(order.rental_type)
    .bind(order.payment_frequency)
    .bind(order.period.start)
    .bind(order.period.end)
    .bind(order.total_price)
    .bind(order.status)
    .bind(order.expires_at)
    .bind(signature.map(|s| s.signer_name.as_str()))
    .bind(signature.map(|s| s.signed_at))
    .bind(signature.map(|s| s.image_ref.as_str()))
    .bind(order.created_at)
    .bind(order.updated_at)
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

/// Write the mutable order fields if `order.version` is still current.
async fn update_order(conn: &mut PgConnection, order: &Order) -> Result<Order, RepositoryError> {
    let row = sqlx::query_as::<_, OrderRow>(concat!(
        "UPDATE rental.rental_order \
         SET status = $2, expires_at = $3, gopay_payment_id = $4, \
             gopay_parent_payment_id = $5, updated_at = $6, version = version + 1 \
         WHERE id = $1 AND version = $7 \
         RETURNING ",
        order_columns!()
    ))
    .bind(order.id)
    .bind(order.status)
    .bind(order.expires_at)
    .bind(order.gateway_payment_id)
    .bind(order.gateway_parent_payment_id)
    .bind(order.updated_at)
    .bind(order.version)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_constraint(e, "order update"))?;

    row.ok_or_else(|| RepositoryError::stale("order", order.id))?
        .try_into()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for order database operations.
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "SELECT ",
            order_columns!(),
            " FROM rental.rental_order WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_gateway_payment(
        &self,
        payment_id: GatewayPaymentId,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "SELECT ",
            order_columns!(),
            " FROM rental.rental_order WHERE gopay_payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(concat!(
            "SELECT ",
            order_columns!(),
            " FROM rental.rental_order \
             WHERE status IN ('reserved', 'awaiting_payment') AND expires_at < $1 \
             ORDER BY expires_at, id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, order: &Order) -> Result<Order, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        update_order(&mut *conn, order).await
    }

    async fn complete(
        &self,
        order: &Order,
        contract: NewContract,
        payment: NewPayment,
    ) -> Result<CompletedOrder, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let order = update_order(&mut *tx, order).await?;
        let contract = contracts::insert_contract(&mut *tx, &contract).await?;
        let payment = payments::insert_payment(&mut *tx, &payment).await?;

        tx.commit().await?;

        Ok(CompletedOrder {
            order,
            contract,
            payment,
        })
    }
}
