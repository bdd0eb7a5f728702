//! Payment repository for database operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use boxrent_core::domain::{BillablePayment, NewPayment, Payment, PaymentLink};
use boxrent_core::{
    BillingPeriod, ContractId, GatewayPaymentId, InvoiceId, Money, OrderId, PaymentId, StorageId,
    UserId,
};

use super::{RepositoryError, commission_rate, map_constraint};
use crate::repository::PaymentRepository;

macro_rules! payment_columns {
    () => {
        "id, amount, paid_at, order_id, contract_id, gopay_payment_id, self_billing_invoice_id"
    };
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: i32,
    amount: i64,
    paid_at: DateTime<Utc>,
    order_id: Option<i32>,
    contract_id: Option<i32>,
    gopay_payment_id: Option<i64>,
    self_billing_invoice_id: Option<i32>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = RepositoryError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let link = PaymentLink::from_columns(
            row.order_id.map(OrderId::new),
            row.contract_id.map(ContractId::new),
        )
        .ok_or_else(|| {
            RepositoryError::DataCorruption(format!(
                "payment {} must link exactly one order or contract",
                row.id
            ))
        })?;

        Ok(Self {
            id: PaymentId::new(row.id),
            amount: Money::from_minor(row.amount),
            paid_at: row.paid_at,
            link,
            gateway_payment_id: row.gopay_payment_id.map(GatewayPaymentId::new),
            invoice_id: row.self_billing_invoice_id.map(InvoiceId::new),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BillableRow {
    payment_id: i32,
    amount: i64,
    storage_id: i32,
    commission_rate: Option<Decimal>,
}

impl TryFrom<BillableRow> for BillablePayment {
    type Error = RepositoryError;

    fn try_from(row: BillableRow) -> Result<Self, Self::Error> {
        Ok(Self {
            payment_id: PaymentId::new(row.payment_id),
            amount: Money::from_minor(row.amount),
            storage_id: StorageId::new(row.storage_id),
            storage_commission_rate: row.commission_rate.map(commission_rate).transpose()?,
        })
    }
}

// =============================================================================
// Shared Statements
// =============================================================================

/// Insert a payment; a repeated gateway payment id is a conflict.
pub(super) async fn insert_payment(
    conn: &mut PgConnection,
    payment: &NewPayment,
) -> Result<Payment, RepositoryError> {
    let (order_id, contract_id) = payment.link.columns();
    let row = sqlx::query_as::<_, PaymentRow>(concat!(
        "INSERT INTO rental.payment (amount, paid_at, order_id, contract_id, gopay_payment_id) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING ",
        payment_columns!()
    ))
    .bind(payment.amount)
    .bind(payment.paid_at)
    .bind(order_id)
    .bind(contract_id)
    .bind(payment.gateway_payment_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_constraint(e, "payment"))?;

    row.try_into()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for payment database operations.
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    /// Create a new payment repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn unbilled_for_landlord(
        &self,
        landlord: UserId,
        period: BillingPeriod,
    ) -> Result<Vec<BillablePayment>, RepositoryError> {
        let (from, until) = period.bounds();
        let rows = sqlx::query_as::<_, BillableRow>(
            r"
            SELECT p.id AS payment_id, p.amount, s.id AS storage_id, s.commission_rate
            FROM rental.payment p
            LEFT JOIN rental.rental_order o ON o.id = p.order_id
            LEFT JOIN rental.contract c ON c.id = p.contract_id
            JOIN rental.storage s ON s.id = COALESCE(o.storage_id, c.storage_id)
            WHERE s.owner_id = $1
              AND p.paid_at >= $2 AND p.paid_at < $3
              AND p.self_billing_invoice_id IS NULL
            ORDER BY p.paid_at, p.id
            ",
        )
        .bind(landlord)
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_for_invoice(&self, invoice: InvoiceId) -> Result<Vec<Payment>, RepositoryError> {
        let rows = sqlx::query_as::<_, PaymentRow>(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM rental.payment WHERE self_billing_invoice_id = $1 ORDER BY paid_at, id"
        ))
        .bind(invoice)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
