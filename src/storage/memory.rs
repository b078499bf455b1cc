use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{OutboxRepository, SessionRepository, UserRepository};
use crate::error::{AppError, AppResult, InternalError};
use crate::models::{
    NewUser, OutboxRecord, Role, Session, SessionOwner, User, UserEvent, UserEventType, UserPage, UserQuery, UserUpdate,
};

// ============================================================================
// In-Memory Store (tests only)
// ============================================================================
//
// Implements all three repository traits over one mutex-guarded state so a
// user mutation and its outbox row commit together or not at all, like the
// Postgres transaction they stand in for.
//
// ============================================================================

#[derive(Default)]
struct State {
    users: BTreeMap<i64, User>,
    next_user_id: i64,
    sessions: HashMap<i64, Session>,
    outbox: Vec<OutboxRecord>,
    next_outbox_id: i64,
    fail_outbox_insert: bool,
    outbox_writes: u32,
}

impl State {
    fn stage_event(&mut self, kind: UserEventType, user: &User) -> AppResult<OutboxRecord> {
        if self.fail_outbox_insert {
            return Err(InternalError::NotNullViolation("injected outbox failure".to_string()).into());
        }

        let event = UserEvent::new(kind, user.snapshot());
        Ok(OutboxRecord {
            id: self.next_outbox_id + 1,
            event_id: event.event_id,
            user_id: user.id,
            event_type: kind.as_str().to_string(),
            attempt_count: 0,
            last_attempt_at: None,
            delivered: false,
            payload: event.snapshot,
            created_at: Utc::now(),
        })
    }

    fn commit_event(&mut self, record: OutboxRecord) {
        self.next_outbox_id = record.id;
        self.outbox.push(record);
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Make the next outbox inserts fail, as a broken second statement would.
    pub fn fail_outbox_inserts(&self, fail: bool) {
        self.lock().fail_outbox_insert = fail;
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn outbox(&self) -> Vec<OutboxRecord> {
        self.lock().outbox.clone()
    }

    /// Number of dispatcher-side writes (failed-attempt or delivered updates).
    pub fn outbox_writes(&self) -> u32 {
        self.lock().outbox_writes
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: NewUser) -> AppResult<i64> {
        let mut state = self.lock();
        if state.users.values().any(|u| u.email == user.email) {
            return Err(AppError::EmailAlreadyExists);
        }

        let now = Utc::now();
        let created = User {
            id: state.next_user_id + 1,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            phone: user.phone,
            created_at: now,
            updated_at: now,
        };

        let record = state.stage_event(UserEventType::UserCreated, &created)?;
        state.next_user_id = created.id;
        state.users.insert(created.id, created.clone());
        state.commit_event(record);

        Ok(created.id)
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        Ok(self.lock().users.values().find(|u| u.email == email).cloned())
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn list_users(&self, query: &UserQuery) -> AppResult<UserPage> {
        let state = self.lock();
        let needle = query.search.as_ref().map(|s| s.to_lowercase());
        let matching: Vec<&User> = state
            .users
            .values()
            .filter(|u| match &needle {
                None => true,
                Some(n) => [&u.email, &u.first_name, &u.last_name]
                    .iter()
                    .any(|field| field.to_lowercase().contains(n.as_str())),
            })
            .collect();

        Ok(UserPage {
            total: matching.len() as i64,
            users: matching
                .into_iter()
                .skip(query.offset.max(0) as usize)
                .take(query.limit.max(0) as usize)
                .cloned()
                .collect(),
        })
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> AppResult<()> {
        let mut state = self.lock();
        if state.users.values().any(|u| u.id != id && u.email == update.email) {
            return Err(AppError::EmailAlreadyExists);
        }
        let mut user = state.users.get(&id).cloned().ok_or(AppError::UserNotFound)?;

        user.first_name = update.first_name;
        user.last_name = update.last_name;
        user.email = update.email;
        user.phone = update.phone;
        user.role = update.role;
        user.updated_at = Utc::now();

        let record = state.stage_event(UserEventType::UserUpdated, &user)?;
        state.users.insert(id, user);
        state.commit_event(record);
        Ok(())
    }

    async fn set_role(&self, id: i64, role: Role) -> AppResult<()> {
        let mut state = self.lock();
        let mut user = state.users.get(&id).cloned().ok_or(AppError::UserNotFound)?;
        user.role = role;
        user.updated_at = Utc::now();

        let record = state.stage_event(UserEventType::UserRoleChanged, &user)?;
        state.users.insert(id, user);
        state.commit_event(record);
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> AppResult<()> {
        let mut state = self.lock();
        let user = state.users.get(&id).cloned().ok_or(AppError::UserNotFound)?;

        let record = state.stage_event(UserEventType::UserDeleted, &user)?;
        state.users.remove(&id);
        state.sessions.remove(&id);
        state.commit_event(record);
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn upsert(&self, user_id: i64, token_digest: &str) -> AppResult<()> {
        let mut state = self.lock();
        if !state.users.contains_key(&user_id) {
            return Err(InternalError::ForeignKeyViolation(format!("user {} does not exist", user_id)).into());
        }

        let now = Utc::now();
        let created_at = state.sessions.get(&user_id).map(|s| s.created_at).unwrap_or(now);
        state.sessions.insert(
            user_id,
            Session {
                user_id,
                token_digest: token_digest.to_string(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn rotate(&self, old_digest: &str, new_digest: &str) -> AppResult<Option<SessionOwner>> {
        let mut state = self.lock();
        let state = &mut *state;
        let Some(session) = state.sessions.values_mut().find(|s| s.token_digest == old_digest) else {
            return Ok(None);
        };
        let Some(user) = state.users.get(&session.user_id) else {
            return Ok(None);
        };

        session.token_digest = new_digest.to_string();
        session.updated_at = Utc::now();
        Ok(Some(SessionOwner {
            user_id: user.id,
            role: user.role,
        }))
    }

    async fn delete(&self, token_digest: &str) -> AppResult<bool> {
        let mut state = self.lock();
        let owner = state
            .sessions
            .values()
            .find(|s| s.token_digest == token_digest)
            .map(|s| s.user_id);

        Ok(owner.and_then(|id| state.sessions.remove(&id)).is_some())
    }
}

#[async_trait]
impl OutboxRepository for MemoryStore {
    async fn fetch_unsent(&self, limit: i64, max_attempts: Option<i32>) -> AppResult<Vec<OutboxRecord>> {
        let state = self.lock();
        Ok(state
            .outbox
            .iter()
            .filter(|r| !r.delivered)
            .filter(|r| max_attempts.map_or(true, |max| r.attempt_count < max))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn record_failed_attempt(&self, ids: &[i64], at: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.lock();
        state.outbox_writes += 1;

        let mut updated = 0;
        for record in state.outbox.iter_mut().filter(|r| ids.contains(&r.id) && !r.delivered) {
            record.attempt_count += 1;
            record.last_attempt_at = Some(at);
            updated += 1;
        }
        Ok(updated)
    }

    async fn mark_delivered(&self, ids: &[i64]) -> AppResult<u64> {
        let mut state = self.lock();
        state.outbox_writes += 1;

        let mut updated = 0;
        for record in state.outbox.iter_mut().filter(|r| ids.contains(&r.id) && !r.delivered) {
            record.delivered = true;
            updated += 1;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role: Role::User,
            phone: None,
        }
    }

    #[tokio::test]
    async fn test_failed_outbox_insert_leaves_no_user() {
        let store = MemoryStore::new();
        store.fail_outbox_inserts(true);

        let err = store.create_user(new_user("ada@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(InternalError::NotNullViolation(_))));
        assert_eq!(store.user_count(), 0);
        assert!(store.outbox().is_empty());

        store.fail_outbox_inserts(false);
        assert_eq!(store.create_user(new_user("ada@x.com")).await.unwrap(), 1);
        assert_eq!(store.outbox().len(), 1);
    }

    #[tokio::test]
    async fn test_every_mutation_enqueues_its_event() {
        let store = MemoryStore::new();
        let id = store.create_user(new_user("ada@x.com")).await.unwrap();
        store.set_role(id, Role::Admin).await.unwrap();
        store
            .update_user(
                id,
                UserUpdate {
                    first_name: "Ada".to_string(),
                    last_name: "King".to_string(),
                    email: "ada@x.com".to_string(),
                    phone: Some("+44".to_string()),
                    role: Role::Admin,
                },
            )
            .await
            .unwrap();
        store.delete_user(id).await.unwrap();

        let kinds: Vec<String> = store.outbox().into_iter().map(|r| r.event_type).collect();
        assert_eq!(kinds, ["user_created", "user_role_changed", "user_updated", "user_deleted"]);
        assert_eq!(store.outbox()[3].payload.last_name, "King");
    }

    #[tokio::test]
    async fn test_list_users_filters_and_pages() {
        let store = MemoryStore::new();
        for email in ["ada@x.com", "alan@y.com", "grace@x.com"] {
            store.create_user(new_user(email)).await.unwrap();
        }

        let page = store
            .list_users(&UserQuery { search: Some("X.COM".to_string()), limit: 1, offset: 1 })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.users.len(), 1);
        assert_eq!(page.users[0].email, "grace@x.com");
    }
}
