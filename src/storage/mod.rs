// ============================================================================
// Storage Contracts
// ============================================================================
//
// Narrow repository traits the core depends on:
// - UserRepository    - credential store; every mutation co-writes an outbox row
// - SessionRepository - one refresh-token session per user, rotated atomically
// - OutboxRepository  - dispatcher view of pending domain events
//
// postgres/ holds the production implementations, memory.rs an in-memory
// double for tests.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{NewUser, OutboxRecord, Role, SessionOwner, User, UserPage, UserQuery, UserUpdate};

pub mod postgres;

#[cfg(test)]
pub mod memory;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert the user and its `user_created` outbox row in one transaction.
    async fn create_user(&self, user: NewUser) -> AppResult<i64>;

    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>>;

    async fn get_by_id(&self, id: i64) -> AppResult<Option<User>>;

    async fn list_users(&self, query: &UserQuery) -> AppResult<UserPage>;

    /// Fails with `UserNotFound` when no row matches.
    async fn update_user(&self, id: i64, update: UserUpdate) -> AppResult<()>;

    async fn set_role(&self, id: i64, role: Role) -> AppResult<()>;

    async fn delete_user(&self, id: i64) -> AppResult<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create or replace the session row for `user_id`.
    async fn upsert(&self, user_id: i64, token_digest: &str) -> AppResult<()>;

    /// Swap `old_digest` for `new_digest` in a single conditional update.
    /// Returns the owner with their current role, or `None` when no row held
    /// `old_digest`.
    async fn rotate(&self, old_digest: &str, new_digest: &str) -> AppResult<Option<SessionOwner>>;

    /// Returns whether a row was deleted.
    async fn delete(&self, token_digest: &str) -> AppResult<bool>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Up to `limit` undelivered rows in insertion order. With `max_attempts`
    /// set, rows that already reached it are skipped.
    async fn fetch_unsent(&self, limit: i64, max_attempts: Option<i32>) -> AppResult<Vec<OutboxRecord>>;

    /// Increment attempt_count and stamp last_attempt_at for every id.
    async fn record_failed_attempt(&self, ids: &[i64], at: DateTime<Utc>) -> AppResult<u64>;

    /// Flip delivered to true for every id still undelivered.
    async fn mark_delivered(&self, ids: &[i64]) -> AppResult<u64>;
}
