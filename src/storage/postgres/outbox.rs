use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::translate_db_error;
use crate::error::AppResult;
use crate::models::{OutboxRecord, UserEvent, UserSnapshot};
use crate::storage::OutboxRepository;

/// Append an event row on the caller's connection. Called inside the same
/// transaction as the user mutation it describes.
pub async fn enqueue_event(conn: &mut PgConnection, event: &UserEvent) -> AppResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO outbox (event_id, user_id, event_type, payload)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(event.event_id)
    .bind(event.snapshot.id)
    .bind(event.kind.as_str())
    .bind(Json(&event.snapshot))
    .fetch_one(conn)
    .await
    .map_err(translate_db_error)?;

    tracing::debug!(outbox_id = id, user_id = event.snapshot.id, event_type = event.kind.as_str(), "Enqueued outbox event");
    Ok(id)
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    event_id: Uuid,
    user_id: i64,
    event_type: String,
    attempt_count: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    delivered: bool,
    payload: Json<UserSnapshot>,
    created_at: DateTime<Utc>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        OutboxRecord {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            event_type: row.event_type,
            attempt_count: row.attempt_count,
            last_attempt_at: row.last_attempt_at,
            delivered: row.delivered,
            payload: row.payload.0,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn fetch_unsent(&self, limit: i64, max_attempts: Option<i32>) -> AppResult<Vec<OutboxRecord>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, event_id, user_id, event_type, attempt_count,
                   last_attempt_at, delivered, payload, created_at
            FROM outbox
            WHERE delivered = false
              AND ($2::INTEGER IS NULL OR attempt_count < $2)
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await
        .map_err(translate_db_error)?;

        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    async fn record_failed_attempt(&self, ids: &[i64], at: DateTime<Utc>) -> AppResult<u64> {
        // Single statement: every row in the batch is bumped or none is
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET attempt_count = attempt_count + 1,
                last_attempt_at = $2
            WHERE id = ANY($1) AND delivered = false
            "#,
        )
        .bind(ids)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(translate_db_error)?;

        Ok(result.rows_affected())
    }

    async fn mark_delivered(&self, ids: &[i64]) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET delivered = true,
                delivered_at = now()
            WHERE id = ANY($1) AND delivered = false
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(translate_db_error)?;

        Ok(result.rows_affected())
    }
}
