use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::{enqueue_event, translate_db_error};
use crate::error::{AppError, AppResult, InternalError};
use crate::models::{NewUser, Role, User, UserEvent, UserEventType, UserPage, UserQuery, UserUpdate};
use crate::storage::UserRepository;

const USER_COLUMNS: &str =
    "id, first_name, last_name, email, password_hash, role, phone, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    first_name: String,
    last_name: String,
    email: String,
    password_hash: String,
    role: String,
    phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| InternalError::Database(format!("unknown role '{}' for user {}", row.role, row.id)))?;

        Ok(User {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            password_hash: row.password_hash,
            role,
            phone: row.phone,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert a user row on the caller's connection and return it.
async fn insert_user(conn: &mut PgConnection, user: &NewUser) -> AppResult<User> {
    let row: UserRow = sqlx::query_as(&format!(
        "INSERT INTO users (first_name, last_name, email, password_hash, role, phone) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
        USER_COLUMNS
    ))
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.role.as_str())
    .bind(&user.phone)
    .fetch_one(conn)
    .await
    .map_err(translate_db_error)?;

    User::try_from(row)
}

/// `%`, `_` and `\` are literal in user-supplied search terms.
fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for ch in search.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[derive(Debug, Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by(&self, column: &str, bind: UserKey<'_>) -> AppResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {} = $1", USER_COLUMNS, column);
        let query = sqlx::query_as::<_, UserRow>(&sql);
        let query = match bind {
            UserKey::Id(id) => query.bind(id),
            UserKey::Email(email) => query.bind(email),
        };

        query
            .fetch_optional(&self.pool)
            .await
            .map_err(translate_db_error)?
            .map(User::try_from)
            .transpose()
    }

    /// Run `UPDATE ... RETURNING` and enqueue `kind` for the resulting row in
    /// one transaction.
    async fn mutate_with_event(
        &self,
        kind: UserEventType,
        build: impl FnOnce(&str) -> String,
        binder: impl for<'q> FnOnce(
            sqlx::query::QueryAs<'q, sqlx::Postgres, UserRow, sqlx::postgres::PgArguments>,
        ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, UserRow, sqlx::postgres::PgArguments>,
    ) -> AppResult<User> {
        let sql = build(USER_COLUMNS);
        let mut tx = self.pool.begin().await.map_err(translate_db_error)?;

        let row = binder(sqlx::query_as::<_, UserRow>(&sql))
            .fetch_optional(&mut *tx)
            .await
            .map_err(translate_db_error)?
            .ok_or(AppError::UserNotFound)?;
        let user = User::try_from(row)?;

        enqueue_event(&mut tx, &UserEvent::new(kind, user.snapshot())).await?;
        tx.commit().await.map_err(translate_db_error)?;

        Ok(user)
    }
}

enum UserKey<'a> {
    Id(i64),
    Email(&'a str),
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create_user(&self, user: NewUser) -> AppResult<i64> {
        let mut tx = self.pool.begin().await.map_err(translate_db_error)?;

        let created = insert_user(&mut tx, &user).await?;
        enqueue_event(&mut tx, &UserEvent::new(UserEventType::UserCreated, created.snapshot())).await?;

        tx.commit().await.map_err(translate_db_error)?;

        tracing::info!(user_id = created.id, "👤 User created");
        Ok(created.id)
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.fetch_one_by("email", UserKey::Email(email)).await
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Option<User>> {
        self.fetch_one_by("id", UserKey::Id(id)).await
    }

    async fn list_users(&self, query: &UserQuery) -> AppResult<UserPage> {
        let pattern = query.search.as_deref().map(like_pattern);
        let filter = "($1::TEXT IS NULL OR email ILIKE $1 OR first_name ILIKE $1 OR last_name ILIKE $1)";

        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE {} ORDER BY id LIMIT $2 OFFSET $3",
            USER_COLUMNS, filter
        ))
        .bind(&pattern)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(translate_db_error)?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users WHERE {}", filter))
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await
            .map_err(translate_db_error)?;

        let users = rows.into_iter().map(User::try_from).collect::<AppResult<Vec<_>>>()?;
        Ok(UserPage { users, total })
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> AppResult<()> {
        self.mutate_with_event(
            UserEventType::UserUpdated,
            |columns| {
                format!(
                    "UPDATE users SET first_name = $2, last_name = $3, email = $4, phone = $5, \
                     role = $6, updated_at = now() WHERE id = $1 RETURNING {}",
                    columns
                )
            },
            |q| {
                q.bind(id)
                    .bind(update.first_name)
                    .bind(update.last_name)
                    .bind(update.email)
                    .bind(update.phone)
                    .bind(update.role.as_str())
            },
        )
        .await?;

        tracing::info!(user_id = id, "✏️  User updated");
        Ok(())
    }

    async fn set_role(&self, id: i64, role: Role) -> AppResult<()> {
        self.mutate_with_event(
            UserEventType::UserRoleChanged,
            |columns| format!("UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING {}", columns),
            |q| q.bind(id).bind(role.as_str()),
        )
        .await?;

        tracing::info!(user_id = id, role = %role, "🔑 User role changed");
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> AppResult<()> {
        // Sessions go with the row via ON DELETE CASCADE
        self.mutate_with_event(
            UserEventType::UserDeleted,
            |columns| format!("DELETE FROM users WHERE id = $1 RETURNING {}", columns),
            |q| q.bind(id),
        )
        .await?;

        tracing::info!(user_id = id, "🗑️  User deleted");
        Ok(())
    }
}
