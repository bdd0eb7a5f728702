//! User repository for database operations.
//!
//! Accounts are managed elsewhere; the rental core only reads them.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;

use boxrent_core::UserId;
use boxrent_core::domain::User;

use super::{RepositoryError, commission_rate};
use crate::repository::UserRepository;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i32,
    email: String,
    name: String,
    is_admin: bool,
    is_landlord: bool,
    commission_rate: Decimal,
    self_billing_prefix: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: UserId::new(row.id),
            email: row.email,
            name: row.name,
            is_admin: row.is_admin,
            is_landlord: row.is_landlord,
            commission_rate: commission_rate(row.commission_rate)?,
            self_billing_prefix: row.self_billing_prefix,
        })
    }
}

/// Repository for user lookups.
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Create a new user repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, email, name, is_admin, is_landlord, commission_rate, self_billing_prefix
            FROM rental.app_user
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_landlords(&self) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, email, name, is_admin, is_landlord, commission_rate, self_billing_prefix
            FROM rental.app_user
            WHERE is_landlord
            ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
