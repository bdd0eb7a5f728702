//! `PostgreSQL` implementations of the rental repositories.
//!
//! # Schema: `rental`
//!
//! ## Tables
//!
//! - `app_user` - Customers, landlords and admins
//! - `place`, `storage_type`, `storage` - Inventory (storage status is a cache)
//! - `storage_unavailability` - Manual blocks
//! - `rental_order` - Orders (GiST exclusion on active claims)
//! - `contract_template`, `contract` - Contracts, one per completed order
//! - `payment` - Payments linked to exactly one order or contract
//! - `self_billing_invoice` - Unique per landlord period and per landlord sequence
//! - `event_outbox` - Domain events whose dispatch failed
//!
//! # Migrations
//!
//! Migrations are stored in `crates/service/migrations/` and run via:
//! ```bash
//! cargo run -p boxrent-cli -- migrate
//! ```
//!
//! Queries are built at runtime with `sqlx::query_as`, so the workspace
//! compiles without a live database.

pub mod contracts;
pub mod invoices;
pub mod orders;
pub mod outbox;
pub mod payments;
pub mod storages;
pub mod users;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use contracts::PgContractRepository;
pub use invoices::PgInvoiceRepository;
pub use orders::PgOrderRepository;
pub use outbox::PgOutboxRepository;
pub use payments::PgPaymentRepository;
pub use storages::PgStorageRepository;
pub use users::PgUserRepository;

/// `SQLSTATE` for `exclusion_violation`.
const EXCLUSION_VIOLATION: &str = "23P01";

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation or a stale optimistic version.
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Stale write detected through the `version` column.
    pub(crate) fn stale(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::Conflict(format!("{entity} {id} was modified concurrently"))
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Map unique and exclusion violations to `Conflict`, keep everything else.
fn map_constraint(err: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err
        && (db_err.is_unique_violation()
            || db_err.code().as_deref() == Some(EXCLUSION_VIOLATION))
    {
        return RepositoryError::Conflict(format!(
            "{what}: {}",
            db_err.constraint().unwrap_or("constraint")
        ));
    }
    RepositoryError::Database(err)
}

/// Whether `err` is the exclusion constraint guarding storage claims.
fn is_exclusion_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(EXCLUSION_VIOLATION))
}

/// Narrow a database counter into the domain's small integer.
fn small_count(value: i16, column: &str) -> Result<u8, RepositoryError> {
    u8::try_from(value)
        .map_err(|_| RepositoryError::DataCorruption(format!("{column} out of range: {value}")))
}

fn commission_rate(
    value: rust_decimal::Decimal,
) -> Result<boxrent_core::CommissionRate, RepositoryError> {
    boxrent_core::CommissionRate::new(value)
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid commission rate: {e}")))
}
