use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::TokenPair;
use crate::models::{Role, User, UserPage};
use crate::services::{ProfileUpdate, Registration};

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl From<RegisterRequest> for Registration {
    fn from(req: RegisterRequest) -> Self {
        Registration {
            first_name: req.first_name,
            last_name: req.last_name,
            email: req.email,
            password: req.password,
            phone: req.phone,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of /refresh and /logout.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: Role,
}

impl From<UpdateUserRequest> for ProfileUpdate {
    fn from(req: UpdateUserRequest) -> Self {
        ProfileUpdate {
            first_name: req.first_name,
            last_name: req.last_name,
            email: req.email,
            phone: req.phone,
            role: req.role,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ============================================================================
// Response bodies
// ============================================================================

#[derive(Debug, Serialize)]
pub struct IdResponse {
    pub status: &'static str,
    pub id: i64,
}

impl IdResponse {
    pub fn ok(id: i64) -> Self {
        Self { status: "OK", id }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenPair> for TokenPairResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }
    }
}

/// Public view of a user; never carries the password hash.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            role: user.role,
            phone: user.phone,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserView>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl UserListResponse {
    pub fn new(page: UserPage, limit: i64, offset: i64) -> Self {
        Self {
            users: page.users.into_iter().map(UserView::from).collect(),
            total: page.total,
            limit,
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_request_accepts_both_spellings() {
        let camel: RefreshRequest = serde_json::from_str(r#"{"refreshToken":"a"}"#).unwrap();
        let snake: RefreshRequest = serde_json::from_str(r#"{"refresh_token":"b"}"#).unwrap();

        assert_eq!(camel.refresh_token, "a");
        assert_eq!(snake.refresh_token, "b");
    }

    #[test]
    fn test_token_pair_is_camel_case() {
        let body = serde_json::to_value(TokenPairResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
        })
        .unwrap();

        assert_eq!(body, serde_json::json!({"accessToken": "a", "refreshToken": "r"}));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        assert!(serde_json::from_str::<SetRoleRequest>(r#"{"role":"root"}"#).is_err());
        let ok: SetRoleRequest = serde_json::from_str(r#"{"role":"admin"}"#).unwrap();
        assert_eq!(ok.role, Role::Admin);
    }
}
