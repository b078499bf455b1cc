use std::sync::Arc;

use crate::auth::password::PasswordHasher;
use crate::auth::tokens::{digest_refresh_token, generate_refresh_token, Claims, TokenIssuer};
use crate::error::{AppError, AppResult, InternalError};
use crate::metrics::Metrics;
use crate::storage::{SessionRepository, UserRepository};

// ============================================================================
// Session Manager
// ============================================================================
//
// Access tokens are stateless and live until expiry. Refresh tokens are
// server-tracked (one row per user, stored as a digest) and are the only
// revocation handle: login replaces the row, refresh swaps it atomically,
// logout deletes it.
//
// ============================================================================

const DUMMY_PASSWORD: &str = "timing-equalisation-password";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct SessionManager {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: TokenIssuer,
    metrics: Arc<Metrics>,
    dummy_hash: Arc<str>,
}

impl SessionManager {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: TokenIssuer,
        metrics: Arc<Metrics>,
    ) -> AppResult<Self> {
        // Verified against when the email is unknown so both failure paths cost one hash check
        let dummy_hash = hasher.hash(DUMMY_PASSWORD)?.into();

        Ok(Self {
            users,
            sessions,
            hasher,
            tokens,
            metrics,
            dummy_hash,
        })
    }

    pub async fn authenticate(&self, email: &str, password: &str) -> AppResult<TokenPair> {
        let result = self.try_authenticate(email, password).await;
        self.metrics.record_auth("login", result.is_ok());
        result
    }

    async fn try_authenticate(&self, email: &str, password: &str) -> AppResult<TokenPair> {
        let user = self.users.get_by_email(email).await?;

        let hash = match &user {
            Some(user) => user.password_hash.clone(),
            None => self.dummy_hash.to_string(),
        };
        let verified = match (self.verify_password(password, hash).await, &user) {
            (Ok(verified), _) => verified,
            // A corrupt stored hash must look like any other failed login to the caller
            (Err(e), Some(user)) => {
                tracing::error!(user_id = user.id, error = %e, "Stored password hash is unreadable");
                false
            }
            (Err(e), None) => return Err(e),
        };

        let user = match user {
            Some(user) if verified => user,
            _ => {
                tracing::debug!("Login rejected");
                return Err(AppError::InvalidCredentials);
            }
        };

        let refresh_token = generate_refresh_token();
        self.sessions.upsert(user.id, &digest_refresh_token(&refresh_token)).await?;
        let access_token = self.tokens.issue(user.id, user.role).map_err(AppError::from)?;

        tracing::info!(user_id = user.id, "🔓 User logged in");
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    pub async fn refresh(&self, old_refresh_token: &str) -> AppResult<TokenPair> {
        let result = self.try_refresh(old_refresh_token).await;
        self.metrics.record_auth("refresh", result.is_ok());
        result
    }

    async fn try_refresh(&self, old_refresh_token: &str) -> AppResult<TokenPair> {
        let refresh_token = generate_refresh_token();
        // Current role, not the one baked into any earlier access token
        let owner = self
            .sessions
            .rotate(&digest_refresh_token(old_refresh_token), &digest_refresh_token(&refresh_token))
            .await?
            .ok_or(AppError::SessionNotFound)?;
        let access_token = self.tokens.issue(owner.user_id, owner.role).map_err(AppError::from)?;

        tracing::debug!(user_id = owner.user_id, "🔄 Session rotated");
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    pub async fn logout(&self, refresh_token: &str) -> AppResult<()> {
        let deleted = self.sessions.delete(&digest_refresh_token(refresh_token)).await?;
        self.metrics.record_auth("logout", deleted);

        if !deleted {
            return Err(AppError::SessionNotFound);
        }
        tracing::debug!("🔒 Session revoked");
        Ok(())
    }

    pub fn verify_access_token(&self, token: &str) -> AppResult<Claims> {
        self.tokens.verify(token).map_err(AppError::from)
    }

    async fn verify_password(&self, password: &str, hash: String) -> AppResult<bool> {
        let hasher = self.hasher.clone();
        let password = password.to_string();

        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| InternalError::PasswordHash(e.to_string()))?
    }
}
