use async_trait::async_trait;
use sqlx::PgPool;

use super::translate_db_error;
use crate::error::{AppResult, InternalError};
use crate::models::{Role, SessionOwner};
use crate::storage::SessionRepository;

#[derive(Debug, Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn upsert(&self, user_id: i64, token_digest: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (user_id, refresh_token)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET refresh_token = EXCLUDED.refresh_token,
                updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(token_digest)
        .execute(&self.pool)
        .await
        .map_err(translate_db_error)?;

        Ok(())
    }

    async fn rotate(&self, old_digest: &str, new_digest: &str) -> AppResult<Option<SessionOwner>> {
        // The row lock taken by UPDATE serializes concurrent rotations of the
        // same token; the loser re-evaluates the WHERE clause and matches nothing.
        // The role comes back from the same statement so nothing can fail
        // between consuming the old token and handing out the new one.
        let row: Option<(i64, String)> = sqlx::query_as(
            r#"
            UPDATE sessions s
            SET refresh_token = $2,
                updated_at = now()
            FROM users u
            WHERE s.refresh_token = $1
              AND u.id = s.user_id
            RETURNING s.user_id, u.role
            "#,
        )
        .bind(old_digest)
        .bind(new_digest)
        .fetch_optional(&self.pool)
        .await
        .map_err(translate_db_error)?;

        row.map(|(user_id, role)| {
            let role = Role::parse(&role)
                .ok_or_else(|| InternalError::Database(format!("unknown role '{}' for user {}", role, user_id)))?;
            Ok(SessionOwner { user_id, role })
        })
        .transpose()
    }

    async fn delete(&self, token_digest: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE refresh_token = $1")
            .bind(token_digest)
            .execute(&self.pool)
            .await
            .map_err(translate_db_error)?;

        Ok(result.rows_affected() > 0)
    }
}
