use std::sync::Arc;

use crate::auth::PasswordHasher;
use crate::error::{AppError, AppResult, InternalError};
use crate::models::{NewUser, Role, User, UserPage, UserQuery, UserUpdate};
use crate::storage::UserRepository;

pub const MIN_PASSWORD_LEN: usize = 3;
pub const MAX_PASSWORD_LEN: usize = 64;
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 255;
const MAX_PHONE_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
}

/// User management on top of the credential store. Every mutation goes
/// through a repository call that co-writes the matching outbox event.
#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserRepository>,
    hasher: Arc<dyn PasswordHasher>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { users, hasher }
    }

    pub async fn register(&self, registration: Registration) -> AppResult<i64> {
        let email = normalize_email(&registration.email)?;
        validate_password(&registration.password)?;
        let first_name = validate_name("first_name", &registration.first_name)?;
        let last_name = validate_name("last_name", &registration.last_name)?;
        let phone = validate_phone(registration.phone)?;

        let password_hash = self.hash_password(registration.password).await?;
        let id = self
            .users
            .create_user(NewUser {
                first_name,
                last_name,
                email,
                password_hash,
                role: Role::User,
                phone,
            })
            .await?;

        tracing::debug!(user_id = id, "Registration accepted");
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> AppResult<User> {
        self.users.get_by_id(id).await?.ok_or(AppError::UserNotFound)
    }

    pub async fn list(&self, search: Option<String>, limit: Option<i64>, offset: Option<i64>) -> AppResult<UserPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let offset = offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::Validation("offset must not be negative".to_string()));
        }

        let search = search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        self.users.list_users(&UserQuery { search, limit, offset }).await
    }

    pub async fn update(&self, id: i64, update: ProfileUpdate) -> AppResult<()> {
        let update = UserUpdate {
            first_name: validate_name("first_name", &update.first_name)?,
            last_name: validate_name("last_name", &update.last_name)?,
            email: normalize_email(&update.email)?,
            phone: validate_phone(update.phone)?,
            role: update.role,
        };

        self.users.update_user(id, update).await
    }

    pub async fn set_role(&self, id: i64, role: Role) -> AppResult<()> {
        self.users.set_role(id, role).await
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        self.users.delete_user(id).await
    }

    async fn hash_password(&self, password: String) -> AppResult<String> {
        let hasher = self.hasher.clone();

        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| InternalError::PasswordHash(e.to_string()))?
    }
}

// ============================================================================
// Input validation
// ============================================================================

fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();

    let valid = email.len() <= MAX_EMAIL_LEN
        && !email.chars().any(char::is_whitespace)
        && match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }
            None => false,
        };

    if !valid {
        return Err(AppError::Validation("email is not a valid address".to_string()));
    }
    Ok(email)
}

fn validate_password(password: &str) -> AppResult<()> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(AppError::Validation(format!(
            "password must be between {} and {} characters",
            MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn validate_name(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.chars().count() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            field, MAX_NAME_LEN
        )));
    }
    Ok(value.to_string())
}

fn validate_phone(phone: Option<String>) -> AppResult<Option<String>> {
    match phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()) {
        Some(p) if p.chars().count() > MAX_PHONE_LEN => Err(AppError::Validation(format!(
            "phone must be at most {} characters",
            MAX_PHONE_LEN
        ))),
        other => Ok(other),
    }
}
