//! Contract repository for database operations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

use boxrent_core::domain::{
    Contract, NewContract, NewPayment, Payment, RecurringBilling, SignedDocument,
};
use boxrent_core::{
    ContractId, ContractTemplateId, GatewayPaymentId, Money, OrderId, PaymentFrequency, PlaceId,
    RentalPeriod, RentalType, StorageId, UserId,
};

use super::{RepositoryError, map_constraint, payments, small_count};
use crate::repository::ContractRepository;

macro_rules! contract_columns {
    () => {
        "id, order_id, user_id, storage_id, rental_type, payment_frequency, start_date, \
         end_date, terminated_at, recurring_amount, gopay_parent_payment_id, \
         next_billing_date, recurring_active, failed_billing_attempts, \
         last_billing_failure_at, template_id, signed_at, created_at, version"
    };
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ContractRow {
    id: i32,
    order_id: i32,
    user_id: i32,
    storage_id: i32,
    rental_type: RentalType,
    payment_frequency: PaymentFrequency,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    terminated_at: Option<DateTime<Utc>>,
    recurring_amount: Option<i64>,
    gopay_parent_payment_id: Option<i64>,
    next_billing_date: Option<NaiveDate>,
    recurring_active: bool,
    failed_billing_attempts: i16,
    last_billing_failure_at: Option<DateTime<Utc>>,
    template_id: Option<i32>,
    signed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    version: i32,
}

impl TryFrom<ContractRow> for Contract {
    type Error = RepositoryError;

    fn try_from(row: ContractRow) -> Result<Self, Self::Error> {
        let recurring = match (
            row.recurring_amount,
            row.gopay_parent_payment_id,
            row.next_billing_date,
        ) {
            (Some(amount), Some(parent), Some(next_billing_date)) => Some(RecurringBilling {
                parent_payment_id: GatewayPaymentId::new(parent),
                amount: Money::from_minor(amount),
                next_billing_date,
                failed_attempts: small_count(
                    row.failed_billing_attempts,
                    "failed_billing_attempts",
                )?,
                last_failure_at: row.last_billing_failure_at,
                active: row.recurring_active,
            }),
            (None, None, None) => None,
            _ => {
                return Err(RepositoryError::DataCorruption(format!(
                    "contract {} has partial recurring billing",
                    row.id
                )));
            }
        };

        let document = match (row.template_id, row.signed_at) {
            (Some(template_id), Some(signed_at)) => Some(SignedDocument {
                template_id: ContractTemplateId::new(template_id),
                signed_at,
            }),
            (None, None) => None,
            _ => {
                return Err(RepositoryError::DataCorruption(format!(
                    "contract {} has a partial signature",
                    row.id
                )));
            }
        };

        Ok(Self {
            id: ContractId::new(row.id),
            order_id: OrderId::new(row.order_id),
            user_id: UserId::new(row.user_id),
            storage_id: StorageId::new(row.storage_id),
            rental_type: row.rental_type,
            payment_frequency: row.payment_frequency,
            // Terminated open-ended contracts gain an end date, so the rental
            // type no longer dictates its presence.
            period: RentalPeriod::new(row.start_date, row.end_date),
            terminated_at: row.terminated_at,
            recurring,
            document,
            created_at: row.created_at,
            version: row.version,
        })
    }
}

// =============================================================================
// Shared Statements
// =============================================================================

/// Insert a contract; the unique `order_id` makes a second insert a conflict.
pub(super) async fn insert_contract(
    conn: &mut PgConnection,
    contract: &NewContract,
) -> Result<Contract, RepositoryError> {
    let recurring = contract.recurring.as_ref();
    let document = contract.document.as_ref();
    let row = sqlx::query_as::<_, ContractRow>(concat!(
        "INSERT INTO rental.contract (order_id, user_id, storage_id, rental_type, \
         payment_frequency, start_date, end_date, recurring_amount, gopay_parent_payment_id, \
         next_billing_date, recurring_active, template_id, signed_at, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         RETURNING ",
        contract_columns!()
    ))
    .bind(contract.order_id)
    .bind(contract.user_id)
    .bind(contract.storage_id)
    .bind(contract.rental_type)
    .bind(contract.payment_frequency)
    .bind(contract.period.start)
    .bind(contract.period.end)
    .bind(recurring.map(|r| r.amount))
    .bind(recurring.map(|r| r.parent_payment_id))
    .bind(recurring.map(|r| r.next_billing_date))
    .bind(recurring.is_some_and(|r| r.active))
    .bind(document.map(|d| d.template_id))
    .bind(document.map(|d| d.signed_at))
    .bind(contract.created_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_constraint(e, "contract"))?;

    row.try_into()
}

/// Write the mutable contract fields if `contract.version` is still current.
async fn update_contract(
    conn: &mut PgConnection,
    contract: &Contract,
) -> Result<Contract, RepositoryError> {
    let recurring = contract.recurring.as_ref();
    let row = sqlx::query_as::<_, ContractRow>(concat!(
        "UPDATE rental.contract \
         SET end_date = $2, terminated_at = $3, recurring_amount = $4, \
             gopay_parent_payment_id = $5, next_billing_date = $6, recurring_active = $7, \
             failed_billing_attempts = $8, last_billing_failure_at = $9, \
             version = version + 1 \
         WHERE id = $1 AND version = $10 \
         RETURNING ",
        contract_columns!()
    ))
    .bind(contract.id)
    .bind(contract.period.end)
    .bind(contract.terminated_at)
    .bind(recurring.map(|r| r.amount))
    .bind(recurring.map(|r| r.parent_payment_id))
    .bind(recurring.map(|r| r.next_billing_date))
    .bind(recurring.is_some_and(|r| r.active))
    .bind(recurring.map_or(0_i16, |r| i16::from(r.failed_attempts)))
    .bind(recurring.and_then(|r| r.last_failure_at))
    .bind(contract.version)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_constraint(e, "contract update"))?;

    row.ok_or_else(|| RepositoryError::stale("contract", contract.id))?
        .try_into()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for contract database operations.
pub struct PgContractRepository {
    pool: PgPool,
}

impl PgContractRepository {
    /// Create a new contract repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_all(
        &self,
        query: sqlx::query::QueryAs<'_, sqlx::Postgres, ContractRow, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Contract>, RepositoryError> {
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl ContractRepository for PgContractRepository {
    async fn get(&self, id: ContractId) -> Result<Option<Contract>, RepositoryError> {
        let row = sqlx::query_as::<_, ContractRow>(concat!(
            "SELECT ",
            contract_columns!(),
            " FROM rental.contract WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Contract>, RepositoryError> {
        let row = sqlx::query_as::<_, ContractRow>(concat!(
            "SELECT ",
            contract_columns!(),
            " FROM rental.contract WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_due_for_billing(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<Contract>, RepositoryError> {
        self.fetch_all(
            sqlx::query_as::<_, ContractRow>(concat!(
                "SELECT ",
                contract_columns!(),
                " FROM rental.contract \
                 WHERE rental_type = 'unlimited' AND terminated_at IS NULL \
                   AND recurring_active AND failed_billing_attempts = 0 \
                   AND next_billing_date <= $1 \
                 ORDER BY next_billing_date, id"
            ))
            .bind(today),
        )
        .await
    }

    async fn find_needing_retry(
        &self,
        failed_before: DateTime<Utc>,
    ) -> Result<Vec<Contract>, RepositoryError> {
        self.fetch_all(
            sqlx::query_as::<_, ContractRow>(concat!(
                "SELECT ",
                contract_columns!(),
                " FROM rental.contract \
                 WHERE terminated_at IS NULL AND recurring_active \
                   AND failed_billing_attempts = 1 AND last_billing_failure_at <= $1 \
                 ORDER BY last_billing_failure_at, id"
            ))
            .bind(failed_before),
        )
        .await
    }

    async fn find_ending_on(&self, end_date: NaiveDate) -> Result<Vec<Contract>, RepositoryError> {
        self.fetch_all(
            sqlx::query_as::<_, ContractRow>(concat!(
                "SELECT ",
                contract_columns!(),
                " FROM rental.contract WHERE end_date = $1 ORDER BY id"
            ))
            .bind(end_date),
        )
        .await
    }

    async fn save(&self, contract: &Contract) -> Result<Contract, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        update_contract(&mut *conn, contract).await
    }

    async fn record_charge(
        &self,
        contract: &Contract,
        payment: NewPayment,
    ) -> Result<(Contract, Payment), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let contract = update_contract(&mut *tx, contract).await?;
        let payment = payments::insert_payment(&mut *tx, &payment).await?;
        tx.commit().await?;
        Ok((contract, payment))
    }

    async fn template_for_place(
        &self,
        place: PlaceId,
    ) -> Result<Option<ContractTemplateId>, RepositoryError> {
        let id = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM rental.contract_template WHERE place_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(place)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id.map(ContractTemplateId::new))
    }
}
