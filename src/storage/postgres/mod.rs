use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseSettings;
use crate::error::{AppError, InternalError};
use crate::utils::{retry_with_backoff, RetryConfig};

mod outbox;
mod sessions;
mod users;

pub use outbox::{enqueue_event, PgOutboxRepository};
pub use sessions::PgSessionRepository;
pub use users::PgUserRepository;

const EMAIL_CONSTRAINT: &str = "users_email_key";

// ============================================================================
// Driver Error Translation
// ============================================================================
//
// The only place that inspects sqlx errors. Everything above the repositories
// sees AppError.
//
// ============================================================================

pub fn translate_db_error(err: sqlx::Error) -> AppError {
    let sqlx::Error::Database(db_err) = &err else {
        return InternalError::Database(err.to_string()).into();
    };

    let message = db_err.message().to_string();
    match db_err.code().as_deref() {
        Some("23505") if db_err.constraint() == Some(EMAIL_CONSTRAINT) => AppError::EmailAlreadyExists,
        Some("23505") => InternalError::Database(format!("unique violation: {}", message)).into(),
        Some("23503") => InternalError::ForeignKeyViolation(message).into(),
        Some("23502") => InternalError::NotNullViolation(message).into(),
        Some("22001") => InternalError::ValueTooLong(message).into(),
        Some("42601") => InternalError::SqlSyntax(message).into(),
        _ => InternalError::Database(message).into(),
    }
}

/// Build the pool and prove the database answers. Startup treats a final
/// failure here as fatal.
pub async fn connect(settings: &DatabaseSettings) -> anyhow::Result<PgPool> {
    let retry = RetryConfig::default();

    let pool = retry_with_backoff(&retry, "postgres_connect", |attempt| {
        tracing::debug!(attempt, "Connecting to Postgres");
        PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.url)
    })
    .await?;

    ping(&pool).await?;

    tracing::info!(
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        "🗄️  Postgres pool ready"
    );
    Ok(pool)
}

pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Pool for the ignored integration tests, with the reference schema applied.
#[cfg(test)]
pub async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for Postgres tests");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");

    sqlx::raw_sql(include_str!("../../../sql/schema.sql"))
        .execute(&pool)
        .await
        .expect("apply schema");

    pool
}
