//! Self-billing invoice repository for database operations.
//!
//! Sequences are allocated per landlord under a row lock on the landlord, so
//! concurrent generator runs never hand out the same number.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use boxrent_core::domain::{InvoiceDraft, SelfBillingInvoice};
use boxrent_core::{BillingPeriod, InvoiceId, Money, PaymentId, UserId};

use super::RepositoryError;
use crate::repository::{InvoiceCreation, InvoiceRepository};

macro_rules! invoice_columns {
    () => {
        "id, landlord_id, year, month, gross_amount, net_amount, sequence, invoice_number, \
         created_at"
    };
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: i32,
    landlord_id: i32,
    year: i32,
    month: i32,
    gross_amount: i64,
    net_amount: i64,
    sequence: i32,
    invoice_number: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for SelfBillingInvoice {
    type Error = RepositoryError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let month = u32::try_from(row.month).map_err(|_| {
            RepositoryError::DataCorruption(format!("invoice {} has month {}", row.id, row.month))
        })?;
        let period = BillingPeriod::new(row.year, month)
            .map_err(|e| RepositoryError::DataCorruption(format!("invoice {}: {e}", row.id)))?;

        Ok(Self {
            id: InvoiceId::new(row.id),
            landlord_id: UserId::new(row.landlord_id),
            period,
            gross_amount: Money::from_minor(row.gross_amount),
            net_amount: Money::from_minor(row.net_amount),
            sequence: row.sequence,
            number: row.invoice_number,
            created_at: row.created_at,
        })
    }
}

#[allow(clippy::cast_possible_wrap)] // months are 1..=12
const fn month_column(period: BillingPeriod) -> i32 {
    period.month() as i32
}

async fn find_in(
    conn: &mut PgConnection,
    landlord: UserId,
    period: BillingPeriod,
) -> Result<Option<SelfBillingInvoice>, RepositoryError> {
    let row = sqlx::query_as::<_, InvoiceRow>(concat!(
        "SELECT ",
        invoice_columns!(),
        " FROM rental.self_billing_invoice WHERE landlord_id = $1 AND year = $2 AND month = $3"
    ))
    .bind(landlord)
    .bind(period.year())
    .bind(month_column(period))
    .fetch_optional(&mut *conn)
    .await?;

    row.map(TryInto::try_into).transpose()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for self-billing invoice database operations.
pub struct PgInvoiceRepository {
    pool: PgPool,
}

impl PgInvoiceRepository {
    /// Create a new invoice repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_locked(
        &self,
        draft: &InvoiceDraft,
    ) -> Result<InvoiceCreation, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Serialises generators for this landlord until commit
        let locked = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM rental.app_user WHERE id = $1 FOR UPDATE",
        )
        .bind(draft.landlord_id)
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Err(RepositoryError::NotFound);
        }

        if let Some(existing) = find_in(&mut *tx, draft.landlord_id, draft.period).await? {
            return Ok(InvoiceCreation::Exists(existing));
        }

        let sequence = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM rental.self_billing_invoice WHERE landlord_id = $1",
        )
        .bind(draft.landlord_id)
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, InvoiceRow>(concat!(
            "INSERT INTO rental.self_billing_invoice (landlord_id, year, month, gross_amount, \
             net_amount, sequence, invoice_number, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING ",
            invoice_columns!()
        ))
        .bind(draft.landlord_id)
        .bind(draft.period.year())
        .bind(month_column(draft.period))
        .bind(draft.gross_amount)
        .bind(draft.net_amount)
        .bind(sequence)
        .bind(draft.number_for(sequence))
        .bind(draft.created_at)
        .fetch_one(&mut *tx)
        .await?;
        let invoice = SelfBillingInvoice::try_from(row)?;

        let payment_ids: Vec<i32> = draft.payment_ids.iter().map(PaymentId::as_i32).collect();
        let billed = sqlx::query(
            r"
            UPDATE rental.payment
            SET self_billing_invoice_id = $1
            WHERE id = ANY($2) AND self_billing_invoice_id IS NULL
            ",
        )
        .bind(invoice.id)
        .bind(&payment_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if usize::try_from(billed).ok() != Some(payment_ids.len()) {
            return Err(RepositoryError::Conflict(format!(
                "payments for invoice {} were billed concurrently",
                invoice.number
            )));
        }

        tx.commit().await?;
        Ok(InvoiceCreation::Created(invoice))
    }
}

#[async_trait]
impl InvoiceRepository for PgInvoiceRepository {
    async fn find(
        &self,
        landlord: UserId,
        period: BillingPeriod,
    ) -> Result<Option<SelfBillingInvoice>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        find_in(&mut *conn, landlord, period).await
    }

    async fn create(&self, draft: InvoiceDraft) -> Result<InvoiceCreation, RepositoryError> {
        match self.insert_locked(&draft).await {
            // The unique (landlord, year, month) constraint caught a concurrent run
            Err(RepositoryError::Database(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                self.find(draft.landlord_id, draft.period)
                    .await?
                    .map(InvoiceCreation::Exists)
                    .ok_or_else(|| {
                        RepositoryError::Conflict(format!(
                            "invoice sequence for landlord {} was taken concurrently",
                            draft.landlord_id
                        ))
                    })
            }
            other => other,
        }
    }

    async fn list_for_landlord(
        &self,
        landlord: UserId,
    ) -> Result<Vec<SelfBillingInvoice>, RepositoryError> {
        let rows = sqlx::query_as::<_, InvoiceRow>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM rental.self_billing_invoice WHERE landlord_id = $1 ORDER BY sequence"
        ))
        .bind(landlord)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
