use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};

use crate::api::AppState;
use crate::error::{AppError, AppResult, InternalError};
use crate::models::Role;

const BEARER_PREFIX: &str = "Bearer ";

/// Caller identity taken from a valid `Authorization: Bearer` access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub role: Role,
}

/// An authenticated caller whose token carries the admin role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminUser(pub AuthenticatedUser);

fn authenticate(req: &HttpRequest) -> AppResult<AuthenticatedUser> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| InternalError::Token("application state is not registered".to_string()))?;

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("Authorization header is missing".to_string()))?;

    let token = header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Authorization header is invalid".to_string()))?;

    let claims = state.sessions.verify_access_token(token)?;
    Ok(AuthenticatedUser {
        user_id: claims.user_id()?,
        role: claims.role,
    })
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = authenticate(req);
        if let Err(e) = &result {
            tracing::debug!(path = %req.path(), error = %e, "Bearer authentication failed");
        }
        ready(result)
    }
}

impl FromRequest for AdminUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = authenticate(req).and_then(|user| match user.role {
            Role::Admin => Ok(AdminUser(user)),
            Role::User => {
                tracing::warn!(user_id = user.user_id, path = %req.path(), "Non-admin caller rejected");
                Err(AppError::Forbidden)
            }
        });
        ready(result)
    }
}
