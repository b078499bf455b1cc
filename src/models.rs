use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

// ============================================================================
// Domain Models
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user row as held by the credential store.
#[derive(Clone, Debug)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            role: self.role,
            phone: self.phone.clone(),
        }
    }
}

/// Input for a new user; `password_hash` is already hashed.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub phone: Option<String>,
}

#[derive(Clone, Debug)]
pub struct UserUpdate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
}

/// Paged listing filter.
#[derive(Clone, Debug)]
pub struct UserQuery {
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Clone, Debug)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: i64,
}

/// Denormalized view of a user, captured into the outbox at enqueue time.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserSnapshot {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub phone: Option<String>,
}

// ============================================================================
// Domain Events
// User lifecycle changes republished through the outbox
// ============================================================================

/// Base trait for all domain events
pub trait DomainEvent {
    fn event_type(&self) -> &str;
    fn aggregate_id(&self) -> i64;
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserEventType {
    UserCreated,
    UserUpdated,
    UserRoleChanged,
    UserDeleted,
}

impl UserEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserEventType::UserCreated => "user_created",
            UserEventType::UserUpdated => "user_updated",
            UserEventType::UserRoleChanged => "user_role_changed",
            UserEventType::UserDeleted => "user_deleted",
        }
    }
}

/// An event about to be written into the outbox alongside its user mutation.
#[derive(Clone, Debug)]
pub struct UserEvent {
    pub event_id: Uuid,
    pub kind: UserEventType,
    pub snapshot: UserSnapshot,
}

impl UserEvent {
    pub fn new(kind: UserEventType, snapshot: UserSnapshot) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            snapshot,
        }
    }
}

impl DomainEvent for UserEvent {
    fn event_type(&self) -> &str {
        self.kind.as_str()
    }

    fn aggregate_id(&self) -> i64 {
        self.snapshot.id
    }
}

// ============================================================================
// Outbox Records
// ============================================================================

/// A persisted outbox row as seen by the dispatcher.
#[derive(Clone, Debug)]
pub struct OutboxRecord {
    pub id: i64,
    pub event_id: Uuid,
    pub user_id: i64,
    pub event_type: String,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered: bool,
    pub payload: UserSnapshot,
    pub created_at: DateTime<Utc>,
}

impl DomainEvent for OutboxRecord {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn aggregate_id(&self) -> i64 {
        self.user_id
    }
}

/// Persisted refresh-token session, at most one per user.
#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: i64,
    pub token_digest: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Owner of a session as of its last rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOwner {
    pub user_id: i64,
    pub role: Role,
}
