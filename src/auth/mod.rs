// ============================================================================
// Authentication
// ============================================================================
//
// - tokens          - HS256 access tokens, opaque refresh tokens and their digests
// - password        - hashing primitive behind a trait (Argon2 in production)
// - session_manager - login, rotation, logout
// - extractors      - actix-web extractors for bearer and admin routes
//
// ============================================================================

pub mod extractors;
pub mod password;
pub mod session_manager;
pub mod tokens;

pub use extractors::{AdminUser, AuthenticatedUser};
pub use password::{Argon2Hasher, PasswordHasher};
pub use session_manager::{SessionManager, TokenPair};
pub use tokens::{Claims, TokenIssuer};
