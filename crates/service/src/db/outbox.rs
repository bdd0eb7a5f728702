//! Durable queue for domain events whose live dispatch failed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use boxrent_core::{DomainEvent, EventEnvelope};

use super::RepositoryError;
use crate::repository::{OutboxEntry, OutboxRepository};

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    payload: Json<DomainEvent>,
    occurred_at: DateTime<Utc>,
    attempts: i32,
    last_error: Option<String>,
}

impl From<OutboxRow> for OutboxEntry {
    fn from(row: OutboxRow) -> Self {
        Self {
            envelope: EventEnvelope {
                id: row.id,
                occurred_at: row.occurred_at,
                event: row.payload.0,
            },
            attempts: row.attempts,
            last_error: row.last_error,
        }
    }
}

/// Repository for the event outbox.
pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    /// Create a new outbox repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn enqueue(&self, envelope: &EventEnvelope, error: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO rental.event_outbox (id, event_type, payload, occurred_at, last_error)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET attempts = rental.event_outbox.attempts + 1, last_error = EXCLUDED.last_error
            ",
        )
        .bind(envelope.id)
        .bind(envelope.event.name())
        .bind(Json(&envelope.event))
        .bind(envelope.occurred_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending(&self, limit: i64) -> Result<Vec<OutboxEntry>, RepositoryError> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r"
            SELECT id, payload, occurred_at, attempts, last_error
            FROM rental.event_outbox
            WHERE dispatched_at IS NULL
            ORDER BY created_at, id
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE rental.event_outbox SET dispatched_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE rental.event_outbox SET attempts = attempts + 1, last_error = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
