use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

// ============================================================================
// Service Error Taxonomy
// ============================================================================
//
// Every layer above the repositories speaks this enum. Storage driver errors
// are translated into it once, in storage::postgres::translate_db_error.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("Session not found")]
    SessionNotFound,

    #[error("{0}")]
    Unauthorized(String),

    #[error("Access denied: user is not an admin")]
    Forbidden,

    #[error("User not found")]
    UserNotFound,

    #[error("User with this email already exists")]
    EmailAlreadyExists,

    #[error("Request timed out or canceled")]
    RequestTimeout,

    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Failures the client cannot act on. Messages are logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum InternalError {
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("not-null violation: {0}")]
    NotNullViolation(String),

    #[error("value too long: {0}")]
    ValueTooLong(String),

    #[error("SQL syntax error: {0}")]
    SqlSyntax(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("token error: {0}")]
    Token(String),

    #[error("password hashing error: {0}")]
    PasswordHash(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// JSON error body shared by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status: "ERROR",
            error: error.into(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials
            | AppError::SessionNotFound
            | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::EmailAlreadyExists => StatusCode::CONFLICT,
            AppError::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Request failed with internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(ErrorBody::new(message))
    }
}
